use core::str::FromStr;

use embassy_executor::Spawner;
use embassy_net::{Runner, Stack, StackResources};
use embassy_time::{with_timeout, Duration};
use esp_hal::{peripherals::WIFI, rng::Rng};
use esp_radio::{
    wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiError},
    Controller, InitializationError,
};
use heapless::String;
use log::{debug, info, warn};
use monitor_core::ConnectivityError;
use static_cell::StaticCell;

use crate::config::{DEVICE_ID, WIFI_PASSWORD, WIFI_SSID};

const ASSOCIATE_TIMEOUT: Duration = Duration::from_secs(10);
const DHCP_TIMEOUT: Duration = Duration::from_secs(15);

/// Static cell for network stack resources
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static RADIO: StaticCell<Controller<'static>> = StaticCell::new();

/// Station-mode WiFi plus the network stack running on top of it.
pub struct WifiLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl WifiLink {
    /// Initialize the radio and network stack without associating yet.
    pub fn start(wifi: WIFI<'static>, spawner: Spawner) -> Result<Self, Error> {
        let radio = RADIO.init(esp_radio::init()?);
        let (controller, interfaces) = esp_radio::wifi::new(radio, wifi, Default::default())?;

        let mut dhcp_config = embassy_net::DhcpConfig::default();
        dhcp_config.hostname = String::<32>::from_str(DEVICE_ID).ok();

        let rng = Rng::new();
        let seed = u64::from(rng.random()) << 32 | u64::from(rng.random());
        let config = embassy_net::Config::dhcpv4(dhcp_config);

        info!("Initialize network stack");
        let stack_resources: &'static mut _ = STACK_RESOURCES.init(StackResources::new());
        let (stack, runner) = embassy_net::new(interfaces.sta, config, stack_resources, seed);

        spawner.spawn(net_task(runner)).map_err(|_| Error::Spawn)?;

        Ok(Self { controller, stack })
    }

    pub fn stack(&self) -> Stack<'static> {
        self.stack
    }

    /// One association attempt, then wait for a DHCP lease.
    pub async fn connect(&mut self) -> Result<(), ConnectivityError> {
        if !matches!(self.controller.is_started(), Ok(true)) {
            let client_config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(WIFI_SSID.into())
                    .with_password(WIFI_PASSWORD.into()),
            );
            self.controller
                .set_config(&client_config)
                .map_err(wifi_failure)?;
            debug!("Starting WiFi controller");
            self.controller.start_async().await.map_err(wifi_failure)?;
        }

        info!("About to connect to {}...", WIFI_SSID);
        with_timeout(ASSOCIATE_TIMEOUT, self.controller.connect_async())
            .await
            .map_err(|_| ConnectivityError::Timeout)?
            .map_err(wifi_failure)?;

        debug!("Wait for IP address");
        with_timeout(DHCP_TIMEOUT, self.stack.wait_config_up())
            .await
            .map_err(|_| ConnectivityError::Timeout)?;

        if let Some(config) = self.stack.config_v4() {
            info!("Connected to WiFi with IP address {}", config.address);
        }
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Err(error) = self.controller.stop_async().await {
            warn!("Failed to stop WiFi: {:?}", error);
        }
    }
}

fn wifi_failure(error: WifiError) -> ConnectivityError {
    warn!("WiFi error: {:?}", error);
    ConnectivityError::Wifi
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[derive(Debug)]
pub enum Error {
    Radio(InitializationError),
    Wifi(WifiError),
    Spawn,
}

impl From<InitializationError> for Error {
    fn from(error: InitializationError) -> Self {
        Self::Radio(error)
    }
}

impl From<WifiError> for Error {
    fn from(error: WifiError) -> Self {
        Self::Wifi(error)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Radio(error) => write!(f, "radio init failed: {:?}", error),
            Self::Wifi(error) => write!(f, "WiFi setup failed: {:?}", error),
            Self::Spawn => write!(f, "network task could not be spawned"),
        }
    }
}
