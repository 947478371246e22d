/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::io;

use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::Error;

#[allow(clippy::large_enum_variant)]
#[doc(hidden)]
pub enum SmtpStream {
    Tcp(TcpStream),
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
    #[cfg(test)]
    Mem(tokio::io::DuplexStream),
    #[cfg(test)]
    Sink(Vec<u8>),
    None,
}

impl Default for SmtpStream {
    fn default() -> Self {
        SmtpStream::None
    }
}

impl SmtpStream {
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SmtpStream::Tcp(stream) => stream.read(buf).await,
            SmtpStream::Tls(stream) => stream.read(buf).await,
            #[cfg(test)]
            SmtpStream::Mem(stream) => stream.read(buf).await,
            _ => unreachable!(),
        }
    }

    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            SmtpStream::Tcp(stream) => stream.write_all(bytes).await,
            SmtpStream::Tls(stream) => stream.write_all(bytes).await,
            #[cfg(test)]
            SmtpStream::Mem(stream) => stream.write_all(bytes).await,
            #[cfg(test)]
            SmtpStream::Sink(bytes_out) => {
                bytes_out.extend_from_slice(bytes);
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        match self {
            SmtpStream::Tcp(stream) => stream.flush().await,
            SmtpStream::Tls(stream) => stream.flush().await,
            #[cfg(test)]
            SmtpStream::Mem(stream) => stream.flush().await,
            #[cfg(test)]
            SmtpStream::Sink(_) => Ok(()),
            _ => unreachable!(),
        }
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            SmtpStream::Tcp(stream) => stream.shutdown().await,
            SmtpStream::Tls(stream) => stream.shutdown().await,
            #[cfg(test)]
            SmtpStream::Mem(stream) => stream.shutdown().await,
            #[cfg(test)]
            SmtpStream::Sink(_) => Ok(()),
            SmtpStream::None => Ok(()),
        }
    }

    /// Writes a message body applying the transparency procedure: a dot at
    /// the start of any line is doubled, and the body is terminated so that
    /// the wire ends in `CRLF.CRLF`.
    pub(crate) async fn write_message(&mut self, message: &[u8]) -> io::Result<()> {
        #[derive(Debug)]
        enum State {
            LineStart,
            Cr,
            Text,
        }

        let mut state = State::LineStart;
        let mut last_pos = 0;
        for (pos, &byte) in message.iter().enumerate() {
            match byte {
                b'.' if matches!(state, State::LineStart) => {
                    self.write_all(&message[last_pos..pos]).await?;
                    self.write_all(b".").await?;
                    last_pos = pos;
                    state = State::Text;
                }
                b'\r' => state = State::Cr,
                b'\n' if matches!(state, State::Cr) => state = State::LineStart,
                _ => state = State::Text,
            }
        }
        self.write_all(&message[last_pos..]).await?;
        if message.last() == Some(&b'\n') {
            self.write_all(b".\r\n").await?;
        } else {
            self.write_all(b"\r\n.\r\n").await?;
        }
        self.flush().await
    }

    /// Upgrades a plain TCP connection to TLS. Already-secure and in-memory
    /// streams pass through unchanged.
    pub(crate) async fn into_tls(
        self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<SmtpStream> {
        match self {
            SmtpStream::Tcp(stream) => Ok(SmtpStream::Tls(
                tls_connector
                    .connect(
                        ServerName::try_from(hostname)
                            .map_err(|_| Error::InvalidTlsName)?
                            .to_owned(),
                        stream,
                    )
                    .await
                    .map_err(|err| {
                        let kind = err.kind();
                        if let Some(inner) = err.into_inner() {
                            match inner.downcast::<rustls::Error>() {
                                Ok(error) => Error::Tls(*error),
                                Err(error) => Error::Io(io::Error::new(kind, error)),
                            }
                        } else {
                            Error::Io(io::Error::new(kind, "unspecified"))
                        }
                    })?,
            )),
            SmtpStream::None => unreachable!(),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::SmtpStream;

    #[tokio::test]
    async fn transparency_procedure() {
        for (test, result) in [
            ("A: b\r\n.\r\n", "A: b\r\n..\r\n.\r\n"),
            ("A: b\r\n.", "A: b\r\n..\r\n.\r\n"),
            ("A: b\r\n..\r\n", "A: b\r\n...\r\n.\r\n"),
            ("A: ...b", "A: ...b\r\n.\r\n"),
            (".starts with a dot", "..starts with a dot\r\n.\r\n"),
            ("no dots at all\r\n", "no dots at all\r\n.\r\n"),
        ] {
            let mut stream = SmtpStream::Sink(Vec::new());
            stream.write_message(test.as_bytes()).await.unwrap();
            if let SmtpStream::Sink(bytes) = stream {
                assert_eq!(String::from_utf8(bytes).unwrap(), result, "input {:?}", test);
            }
        }
    }
}
