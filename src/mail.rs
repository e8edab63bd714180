use core::fmt::{Display, Formatter, Result as FmtResult};

use embassy_executor::Spawner;
use embassy_net::{
    dns::DnsQueryType,
    tcp::{Error as TcpError, TcpSocket},
};
use embassy_time::Duration;
use embedded_io::{ErrorKind, ErrorType};
use embedded_io_async::{Read, Write};
use esp_hal::peripherals::WIFI;
use log::{debug, error, info, warn};
use monitor_core::{
    notifier::Message,
    smtp::{self, SmtpAccount},
    ConnectivityError, MailTransport,
};

use crate::wifi::WifiLink;

const BUFFER_SIZE: usize = 1536;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(20);

/// Sends mail over WiFi. The radio is only brought up on the first connect
/// attempt, so cycles without anything to report never power it.
pub struct SmtpMailer {
    wifi: Option<WIFI<'static>>,
    link: Option<WifiLink>,
    spawner: Spawner,
    account: SmtpAccount<'static>,
    host: &'static str,
    port: u16,
    rx_buffer: [u8; BUFFER_SIZE],
    tx_buffer: [u8; BUFFER_SIZE],
}

impl SmtpMailer {
    pub fn new(
        wifi: WIFI<'static>,
        spawner: Spawner,
        account: SmtpAccount<'static>,
        host: &'static str,
        port: u16,
    ) -> Self {
        Self {
            wifi: Some(wifi),
            link: None,
            spawner,
            account,
            host,
            port,
            rx_buffer: [0; BUFFER_SIZE],
            tx_buffer: [0; BUFFER_SIZE],
        }
    }

    fn link(&mut self) -> Result<&mut WifiLink, ConnectivityError> {
        if self.link.is_none() {
            let wifi = self.wifi.take().ok_or(ConnectivityError::Wifi)?;
            let link = WifiLink::start(wifi, self.spawner).map_err(|error| {
                error!("Cannot bring up WiFi: {}", error);
                ConnectivityError::Wifi
            })?;
            self.link = Some(link);
        }
        self.link.as_mut().ok_or(ConnectivityError::Wifi)
    }
}

impl MailTransport for SmtpMailer {
    async fn connect(&mut self) -> Result<(), ConnectivityError> {
        self.link()?.connect().await
    }

    async fn send(&mut self, message: &Message) -> Result<(), ConnectivityError> {
        let stack = self.link()?.stack();

        let host_addr = stack
            .dns_query(self.host, DnsQueryType::A)
            .await
            .map_err(|error| {
                warn!("DNS lookup of {} failed: {:?}", self.host, error);
                ConnectivityError::Dns
            })?
            .first()
            .copied()
            .ok_or(ConnectivityError::Dns)?;

        let mut socket = TcpSocket::new(stack, &mut self.rx_buffer, &mut self.tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        debug!("Connecting to SMTP server {}:{}...", host_addr, self.port);
        socket
            .connect((host_addr, self.port))
            .await
            .map_err(|error| {
                warn!("TCP connect failed: {:?}", error);
                ConnectivityError::Tcp
            })?;

        let result = smtp::send_mail(&mut SocketStream(&mut socket), &self.account, message).await;
        socket.close();

        match result {
            Ok(()) => {
                info!("Mail accepted by {}", self.host);
                Ok(())
            }
            Err(error) => {
                warn!("SMTP session failed: {}", error);
                Err(error.into())
            }
        }
    }

    async fn release(&mut self) {
        if let Some(link) = self.link.as_mut() {
            link.stop().await;
        }
    }
}

/// `embedded-io-async` view of a connected socket.
struct SocketStream<'s, 'a>(&'s mut TcpSocket<'a>);

#[derive(Debug)]
struct SocketError(TcpError);

impl Display for SocketError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?}", self.0)
    }
}

impl core::error::Error for SocketError {}

impl embedded_io::Error for SocketError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ConnectionReset
    }
}

impl ErrorType for SocketStream<'_, '_> {
    type Error = SocketError;
}

impl Read for SocketStream<'_, '_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf).await.map_err(SocketError)
    }
}

impl Write for SocketStream<'_, '_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.write(buf).await.map_err(SocketError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush().await.map_err(SocketError)
    }
}
