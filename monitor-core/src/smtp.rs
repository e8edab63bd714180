//! Minimal SMTP submission client.
//!
//! Speaks plain SMTP over any async byte stream: greeting, `EHLO`,
//! optional `AUTH LOGIN`, envelope, `DATA` with dot-stuffing, `QUIT`.

use core::fmt::{Debug, Display, Formatter, Result as FmtResult};

use embedded_io_async::{Read, Write};
use heapless::String;
use log::debug;

use crate::notifier::Message;

const REPLY_BUFFER_SIZE: usize = 512;
const CREDENTIAL_SIZE: usize = 128;

const SERVICE_READY: u16 = 220;
const SERVICE_CLOSING: u16 = 221;
const AUTH_SUCCEEDED: u16 = 235;
const OK: u16 = 250;
const USER_NOT_LOCAL: u16 = 251;
const AUTH_CONTINUE: u16 = 334;
const START_MAIL_INPUT: u16 = 354;

/// Sender identity and envelope for outgoing mail.
#[derive(Debug, Clone, Copy)]
pub struct SmtpAccount<'a> {
    pub helo_domain: &'a str,
    /// Empty when the relay accepts unauthenticated submission
    pub username: &'a str,
    pub password: &'a str,
    pub from_name: &'a str,
    pub from_email: &'a str,
    /// Empty entries are skipped
    pub recipients: [&'a str; 2],
}

impl<'a> SmtpAccount<'a> {
    fn recipients(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.recipients
            .iter()
            .copied()
            .filter(|recipient| !recipient.is_empty())
    }
}

/// Run one complete SMTP session delivering `message`.
pub async fn send_mail<S>(
    stream: &mut S,
    account: &SmtpAccount<'_>,
    message: &Message,
) -> Result<(), SmtpError<S::Error>>
where
    S: Read + Write,
{
    if account.recipients().next().is_none() {
        return Err(SmtpError::NoRecipients);
    }

    let mut session = Session::new(stream);
    session.expect(&[SERVICE_READY]).await?;

    session.command(&["EHLO ", account.helo_domain]).await?;
    session.expect(&[OK]).await?;

    if !account.username.is_empty() {
        session.command(&["AUTH LOGIN"]).await?;
        session.expect(&[AUTH_CONTINUE]).await?;
        let username =
            base64::<CREDENTIAL_SIZE>(account.username.as_bytes()).ok_or(SmtpError::Overflow)?;
        session.command(&[username.as_str()]).await?;
        session.expect(&[AUTH_CONTINUE]).await?;
        let password =
            base64::<CREDENTIAL_SIZE>(account.password.as_bytes()).ok_or(SmtpError::Overflow)?;
        session.command(&[password.as_str()]).await?;
        session.expect(&[AUTH_SUCCEEDED]).await?;
    }

    session
        .command(&["MAIL FROM:<", account.from_email, ">"])
        .await?;
    session.expect(&[OK]).await?;

    for recipient in account.recipients() {
        session.command(&["RCPT TO:<", recipient, ">"]).await?;
        session.expect(&[OK, USER_NOT_LOCAL]).await?;
    }

    session.command(&["DATA"]).await?;
    session.expect(&[START_MAIL_INPUT]).await?;
    session.write_content(account, message).await?;
    session.expect(&[OK]).await?;

    // The message is accepted at this point, a missing goodbye does not matter.
    if session.command(&["QUIT"]).await.is_ok() {
        let _ = session.expect(&[SERVICE_CLOSING]).await;
    }
    Ok(())
}

struct Session<'s, S> {
    stream: &'s mut S,
    buffer: [u8; REPLY_BUFFER_SIZE],
    filled: usize,
}

impl<'s, S> Session<'s, S>
where
    S: Read + Write,
{
    fn new(stream: &'s mut S) -> Self {
        Self {
            stream,
            buffer: [0; REPLY_BUFFER_SIZE],
            filled: 0,
        }
    }

    async fn write(&mut self, text: &str) -> Result<(), SmtpError<S::Error>> {
        self.stream
            .write_all(text.as_bytes())
            .await
            .map_err(SmtpError::Io)
    }

    async fn command(&mut self, parts: &[&str]) -> Result<(), SmtpError<S::Error>> {
        for part in parts {
            self.write(part).await?;
        }
        self.write("\r\n").await?;
        self.stream.flush().await.map_err(SmtpError::Io)
    }

    async fn write_content(
        &mut self,
        account: &SmtpAccount<'_>,
        message: &Message,
    ) -> Result<(), SmtpError<S::Error>> {
        self.write("From: \"").await?;
        self.write(account.from_name).await?;
        self.write("\" <").await?;
        self.write(account.from_email).await?;
        self.write(">\r\nTo: ").await?;
        for (index, recipient) in account.recipients().enumerate() {
            if index > 0 {
                self.write(", ").await?;
            }
            self.write(recipient).await?;
        }
        self.write("\r\nSubject: ").await?;
        self.write(message.subject.trim_end()).await?;
        self.write("\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n")
            .await?;

        for line in message.body.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.starts_with('.') {
                self.write(".").await?;
            }
            self.write(line).await?;
            self.write("\r\n").await?;
        }
        self.command(&["."]).await
    }

    /// Read one complete (possibly multi-line) reply and check its code.
    async fn expect(&mut self, accepted: &[u16]) -> Result<u16, SmtpError<S::Error>> {
        let code = loop {
            let (code, last) = self.read_line().await?;
            if last {
                break code;
            }
        };
        debug!("SMTP <- {}", code);

        if accepted.contains(&code) {
            Ok(code)
        } else {
            Err(SmtpError::UnexpectedReply {
                expected: accepted.first().copied().unwrap_or_default(),
                received: code,
            })
        }
    }

    /// Returns the reply code and whether this was the last line of the reply.
    async fn read_line(&mut self) -> Result<(u16, bool), SmtpError<S::Error>> {
        loop {
            if let Some(end) = self.buffer[..self.filled].iter().position(|&b| b == b'\n') {
                let parsed = parse_reply_line(&self.buffer[..end]);
                self.buffer.copy_within(end + 1..self.filled, 0);
                self.filled -= end + 1;
                return parsed;
            }

            if self.filled == self.buffer.len() {
                return Err(SmtpError::Overflow);
            }
            let read = self
                .stream
                .read(&mut self.buffer[self.filled..])
                .await
                .map_err(SmtpError::Io)?;
            if read == 0 {
                return Err(SmtpError::Malformed);
            }
            self.filled += read;
        }
    }
}

fn parse_reply_line<E>(line: &[u8]) -> Result<(u16, bool), SmtpError<E>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.len() < 3 || !line[..3].iter().all(u8::is_ascii_digit) {
        return Err(SmtpError::Malformed);
    }

    let code = line[..3]
        .iter()
        .fold(0u16, |code, digit| code * 10 + u16::from(digit - b'0'));
    match line.get(3) {
        None | Some(b' ') => Ok((code, true)),
        Some(b'-') => Ok((code, false)),
        Some(_) => Err(SmtpError::Malformed),
    }
}

fn base64<const N: usize>(input: &[u8]) -> Option<String<N>> {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut encoded = String::new();
    for chunk in input.chunks(3) {
        let bytes = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let triple = u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]);

        for position in 0..4 {
            let symbol = if position <= chunk.len() {
                ALPHABET[(triple >> (18 - 6 * position) & 0x3f) as usize] as char
            } else {
                '='
            };
            encoded.push(symbol).ok()?;
        }
    }
    Some(encoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpError<E> {
    Io(E),
    UnexpectedReply { expected: u16, received: u16 },
    /// The server closed the connection or sent a line that is not a reply
    Malformed,
    Overflow,
    NoRecipients,
}

impl<E: Debug> Display for SmtpError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(e) => write!(f, "I/O error: {:?}", e),
            Self::UnexpectedReply { expected, received } => {
                write!(f, "expected reply {}, got {}", expected, received)
            }
            Self::Malformed => write!(f, "malformed reply"),
            Self::Overflow => write!(f, "buffer overflow"),
            Self::NoRecipients => write!(f, "no recipients"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_io_async::{ErrorKind, ErrorType};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Broken;

    impl Display for Broken {
        fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
            write!(f, "broken pipe")
        }
    }

    impl core::error::Error for Broken {}

    impl embedded_io_async::Error for Broken {
        fn kind(&self) -> ErrorKind {
            ErrorKind::BrokenPipe
        }
    }

    /// Replays canned server output in small chunks and records what the client wrote.
    struct ScriptedServer {
        replies: &'static [u8],
        position: usize,
        chunk: usize,
        written: std::string::String,
    }

    impl ScriptedServer {
        fn new(replies: &'static str) -> Self {
            Self {
                replies: replies.as_bytes(),
                position: 0,
                chunk: 7,
                written: std::string::String::new(),
            }
        }
    }

    impl ErrorType for ScriptedServer {
        type Error = Broken;
    }

    impl Read for ScriptedServer {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Broken> {
            let remaining = &self.replies[self.position..];
            let n = remaining.len().min(buf.len()).min(self.chunk);
            buf[..n].copy_from_slice(&remaining[..n]);
            self.position += n;
            Ok(n)
        }
    }

    impl Write for ScriptedServer {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Broken> {
            self.written.push_str(core::str::from_utf8(buf).unwrap());
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Broken> {
            Ok(())
        }
    }

    const ACCOUNT: SmtpAccount<'static> = SmtpAccount {
        helo_domain: "battery-monitor",
        username: "monitor@example.com",
        password: "s3cret pass",
        from_name: "Battery Monitor",
        from_email: "monitor@example.com",
        recipients: ["skipper@example.com", "5551234@txt.example.net"],
    };

    const HAPPY_REPLIES: &str = "220 mail.example.com ESMTP\r\n\
        250-mail.example.com\r\n\
        250-AUTH LOGIN PLAIN\r\n\
        250 8BITMIME\r\n\
        334 VXNlcm5hbWU6\r\n\
        334 UGFzc3dvcmQ6\r\n\
        235 2.7.0 Authentication successful\r\n\
        250 2.1.0 Sender OK\r\n\
        250 2.1.5 Recipient OK\r\n\
        251 2.1.5 Forwarding\r\n\
        354 End data with <CR><LF>.<CR><LF>\r\n\
        250 2.0.0 Queued\r\n\
        221 2.0.0 Bye\r\n";

    fn message(subject: &str, body: &str) -> Message {
        Message {
            subject: String::try_from(subject).unwrap(),
            body: String::try_from(body).unwrap(),
        }
    }

    #[test]
    fn delivers_with_auth_login_to_both_recipients() {
        let mut server = ScriptedServer::new(HAPPY_REPLIES);
        let message = message(
            "Alarm: Battery A (Engine) ",
            "Battery A (Engine): 10.20 V ALARM\nWake 3",
        );

        block_on(send_mail(&mut server, &ACCOUNT, &message)).unwrap();

        let expected = "EHLO battery-monitor\r\n\
            AUTH LOGIN\r\n\
            bW9uaXRvckBleGFtcGxlLmNvbQ==\r\n\
            czNjcmV0IHBhc3M=\r\n\
            MAIL FROM:<monitor@example.com>\r\n\
            RCPT TO:<skipper@example.com>\r\n\
            RCPT TO:<5551234@txt.example.net>\r\n\
            DATA\r\n\
            From: \"Battery Monitor\" <monitor@example.com>\r\n\
            To: skipper@example.com, 5551234@txt.example.net\r\n\
            Subject: Alarm: Battery A (Engine)\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            Battery A (Engine): 10.20 V ALARM\r\n\
            Wake 3\r\n\
            .\r\n\
            QUIT\r\n";
        assert_eq!(server.written, expected);
        assert_eq!(server.position, HAPPY_REPLIES.len());
    }

    #[test]
    fn rejected_credentials_stop_the_dialog() {
        let mut server = ScriptedServer::new(
            "220 ready\r\n250 hello\r\n334 VXNlcm5hbWU6\r\n334 UGFzc3dvcmQ6\r\n\
             535 5.7.8 Bad credentials\r\n",
        );

        let result = block_on(send_mail(&mut server, &ACCOUNT, &message("s", "b")));

        assert_eq!(
            result,
            Err(SmtpError::UnexpectedReply {
                expected: 235,
                received: 535
            })
        );
        assert!(!server.written.contains("MAIL FROM"));
    }

    #[test]
    fn skips_auth_and_empty_recipient_on_open_relay() {
        let mut server = ScriptedServer::new(
            "220 relay\r\n250 hi\r\n250 ok\r\n250 ok\r\n354 go\r\n250 queued\r\n221 bye\r\n",
        );
        let account = SmtpAccount {
            username: "",
            password: "",
            recipients: ["skipper@example.com", ""],
            ..ACCOUNT
        };

        let message = message("OK: Batteries Charged", "fine");
        block_on(send_mail(&mut server, &account, &message)).unwrap();

        assert!(!server.written.contains("AUTH"));
        assert_eq!(server.written.matches("RCPT TO").count(), 1);
        assert!(server.written.contains("To: skipper@example.com\r\n"));
    }

    #[test]
    fn body_lines_starting_with_a_dot_are_stuffed() {
        let mut server = ScriptedServer::new(
            "220 relay\r\n250 hi\r\n250 ok\r\n250 ok\r\n354 go\r\n250 queued\r\n221 bye\r\n",
        );
        let account = SmtpAccount {
            username: "",
            recipients: ["skipper@example.com", ""],
            ..ACCOUNT
        };

        block_on(send_mail(&mut server, &account, &message("s", ".hidden\nline"))).unwrap();

        assert!(server.written.contains("\r\n\r\n..hidden\r\nline\r\n.\r\n"));
    }

    #[test]
    fn closed_connection_is_malformed() {
        let mut server = ScriptedServer::new("220 ready\r\n250-partial");

        let result = block_on(send_mail(&mut server, &ACCOUNT, &message("s", "b")));

        assert_eq!(result, Err(SmtpError::Malformed));
    }

    #[test]
    fn refuses_without_recipients() {
        let mut server = ScriptedServer::new("");
        let account = SmtpAccount {
            recipients: ["", ""],
            ..ACCOUNT
        };

        let result = block_on(send_mail(&mut server, &account, &message("s", "b")));

        assert_eq!(result, Err(SmtpError::NoRecipients));
        assert!(server.written.is_empty());
    }

    #[test]
    fn parses_reply_lines() {
        assert_eq!(parse_reply_line::<()>(b"250 OK\r"), Ok((250, true)));
        assert_eq!(parse_reply_line::<()>(b"250-SIZE"), Ok((250, false)));
        assert_eq!(parse_reply_line::<()>(b"354"), Ok((354, true)));
        assert_eq!(parse_reply_line::<()>(b"25x ok"), Err(SmtpError::Malformed));
        assert_eq!(parse_reply_line::<()>(b"250?"), Err(SmtpError::Malformed));
    }

    #[test]
    fn base64_matches_rfc4648_vectors() {
        let cases = [
            ("", ""),
            ("f", "Zg=="),
            ("fo", "Zm8="),
            ("foo", "Zm9v"),
            ("foob", "Zm9vYg=="),
            ("fooba", "Zm9vYmE="),
            ("foobar", "Zm9vYmFy"),
        ];
        for (input, expected) in cases {
            let encoded = base64::<16>(input.as_bytes()).unwrap();
            assert_eq!(encoded.as_str(), expected, "{input:?}");
        }
        assert_eq!(base64::<4>(b"foob"), None);
    }
}
