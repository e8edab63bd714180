//! Composing and dispatching notification e-mails.
//!
//! The notifier decides *what* goes into a message and owns the retry budget
//! for bringing up connectivity. How the message travels (WiFi association,
//! DNS, TCP, SMTP) is the [`MailTransport`]'s business.

use core::fmt::{Display, Formatter, Result as FmtResult, Write};

use embedded_hal_async::delay::DelayNs;
use heapless::String;
use log::{debug, info, warn};

use crate::{
    config::{ChannelId, MonitorConfig, RetryPolicy},
    controller::ChannelOutcome,
    evaluator::Severity,
    smtp::SmtpError,
    BUF_SIZE,
};

pub const BODY_SIZE: usize = 2 * BUF_SIZE;

/// Something the cycle wants to tell the user about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotificationEvent {
    pub subject_template: &'static str,
    /// `None` for the aggregate all-clear message
    pub channel: Option<ChannelId>,
    pub severity: Severity,
    /// Estimated seconds since first boot
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String<BUF_SIZE>,
    pub body: String<BODY_SIZE>,
}

/// Per-cycle facts the message body is written from.
pub struct MessageContext<'a> {
    pub config: &'a MonitorConfig,
    pub outcomes: &'a [ChannelOutcome],
    pub cycle_index: u32,
}

/// Outbound mail path.
#[allow(async_fn_in_trait)]
pub trait MailTransport {
    /// Make a single attempt at bringing up connectivity.
    async fn connect(&mut self) -> Result<(), ConnectivityError>;

    /// Deliver one message over an established connection.
    async fn send(&mut self, message: &Message) -> Result<(), ConnectivityError>;

    /// Tear connectivity down again; called after every dispatch.
    async fn release(&mut self);
}

impl<T: MailTransport + ?Sized> MailTransport for &mut T {
    async fn connect(&mut self) -> Result<(), ConnectivityError> {
        (**self).connect().await
    }

    async fn send(&mut self, message: &Message) -> Result<(), ConnectivityError> {
        (**self).send(message).await
    }

    async fn release(&mut self) {
        (**self).release().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Mail is disabled, the message went to the log only
    Logged,
}

pub struct Notifier<T, D> {
    transport: T,
    delay: D,
    retry: RetryPolicy,
    send_mail: bool,
}

impl<T, D> Notifier<T, D>
where
    T: MailTransport,
    D: DelayNs,
{
    pub fn new(transport: T, delay: D, config: &MonitorConfig) -> Self {
        Self {
            transport,
            delay,
            retry: config.wifi_retry,
            send_mail: config.send_mail,
        }
    }

    /// Compose one message out of `events` and dispatch it.
    ///
    /// A message that cannot be delivered within the retry budget is dropped;
    /// the next wake cycle decides again from fresh readings.
    pub async fn notify(
        &mut self,
        events: &[NotificationEvent],
        context: &MessageContext<'_>,
    ) -> Result<Delivery, SendFailure> {
        let message = compose(events, context)?;

        if !self.send_mail {
            info!(
                "Mail disabled, not sending '{}':\n{}",
                message.subject, message.body
            );
            return Ok(Delivery::Logged);
        }

        self.acquire().await?;
        info!("Sending '{}'", message.subject);
        let sent = self.transport.send(&message).await;
        self.transport.release().await;

        match sent {
            Ok(()) => Ok(Delivery::Sent),
            Err(error) => {
                warn!("Dropping '{}': {}", message.subject, error);
                Err(SendFailure::Connectivity(error))
            }
        }
    }

    async fn acquire(&mut self) -> Result<(), SendFailure> {
        let attempts = self.retry.attempts.max(1);
        let mut last = ConnectivityError::Wifi;

        for attempt in 1..=attempts {
            match self.transport.connect().await {
                Ok(()) => {
                    debug!("Connected on attempt {}/{}", attempt, attempts);
                    return Ok(());
                }
                Err(error) => {
                    debug!("Connect attempt {}/{} failed: {}", attempt, attempts, error);
                    last = error;
                    if attempt < attempts {
                        self.delay.delay_ms(self.retry.interval_ms).await;
                    }
                }
            }
        }

        warn!("Giving up after {} connect attempts: {}", attempts, last);
        self.transport.release().await;
        Err(SendFailure::RetriesExhausted { attempts, last })
    }
}

/// Build the subject from the event templates and the body from the outcomes.
pub fn compose(
    events: &[NotificationEvent],
    context: &MessageContext<'_>,
) -> Result<Message, SendFailure> {
    let first = events.first().ok_or(SendFailure::NothingToSend)?;

    let mut subject: String<BUF_SIZE> = String::new();
    for event in events {
        subject
            .push_str(event.subject_template)
            .map_err(|_| SendFailure::Compose)?;
    }

    let mut body: String<BODY_SIZE> = String::new();
    for outcome in context.outcomes {
        let label = context
            .config
            .channel(outcome.channel())
            .map(|channel| channel.label)
            .unwrap_or("Battery");
        let line = match outcome {
            ChannelOutcome::Evaluated { reading, severity } => {
                writeln!(body, "{}: {:.2} V {}", label, reading.voltage, severity)
            }
            ChannelOutcome::Unknown { .. } => writeln!(body, "{}: unavailable", label),
        };
        line.map_err(|_| SendFailure::Compose)?;
    }

    let minutes = first.timestamp / 60;
    write!(
        body,
        "Wake {}, monitoring for {}d {}h {}m",
        context.cycle_index,
        minutes / (24 * 60),
        minutes / 60 % 24,
        minutes % 60
    )
    .map_err(|_| SendFailure::Compose)?;

    Ok(Message { subject, body })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    /// WiFi association or DHCP failed
    Wifi,
    Timeout,
    Dns,
    Tcp,
    /// The stream broke mid-dialog
    Io,
    /// The SMTP server answered with an unexpected reply code
    Smtp { expected: u16, received: u16 },
    /// The SMTP server sent something that is not a reply
    Protocol,
}

impl<E> From<SmtpError<E>> for ConnectivityError {
    fn from(error: SmtpError<E>) -> Self {
        match error {
            SmtpError::Io(_) => Self::Io,
            SmtpError::UnexpectedReply { expected, received } => Self::Smtp { expected, received },
            SmtpError::Malformed | SmtpError::Overflow | SmtpError::NoRecipients => Self::Protocol,
        }
    }
}

impl Display for ConnectivityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Wifi => write!(f, "WiFi unavailable"),
            Self::Timeout => write!(f, "timed out"),
            Self::Dns => write!(f, "DNS lookup failed"),
            Self::Tcp => write!(f, "TCP connection failed"),
            Self::Io => write!(f, "connection broke"),
            Self::Smtp { expected, received } => {
                write!(f, "SMTP server replied {} instead of {}", received, expected)
            }
            Self::Protocol => write!(f, "SMTP protocol error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    NothingToSend,
    /// Subject or body did not fit its buffer
    Compose,
    RetriesExhausted {
        attempts: u8,
        last: ConnectivityError,
    },
    Connectivity(ConnectivityError),
}

impl Display for SendFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NothingToSend => write!(f, "no events to send"),
            Self::Compose => write!(f, "message does not fit its buffers"),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "no connectivity after {} attempts ({})", attempts, last)
            }
            Self::Connectivity(error) => write!(f, "{}", error),
        }
    }
}
