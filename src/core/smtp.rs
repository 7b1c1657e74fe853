use crate::models::account::{Account, SecurityType};
use anyhow::{Context, Result};
use lettre::{
    message::Message,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        response::Response,
    },
    SmtpTransport, Transport,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

pub struct SmtpClient {
    transport: SmtpTransport,
}

impl SmtpClient {
    pub fn connect(account: &Account, secret: &SecretString, timeout: Duration) -> Result<Self> {
        let tls_parameters = TlsParameters::builder(account.smtp_host.clone())
            .dangerous_accept_invalid_certs(account.accept_invalid_certs)
            .build()
            .context("Failed to configure SMTP TLS")?;

        let tls = match account.smtp_security {
            SecurityType::StartTls => Tls::Required(tls_parameters),
            SecurityType::Ssl => Tls::Wrapper(tls_parameters),
        };

        let transport = SmtpTransport::builder_dangerous(&account.smtp_host)
            .port(account.smtp_port)
            .tls(tls)
            .timeout(Some(timeout))
            .credentials(Credentials::new(
                account.username.clone(),
                secret.expose_secret().to_string(),
            ))
            .build();

        Ok(Self { transport })
    }

    pub fn send_message(&self, message: &Message) -> Result<Response> {
        self.transport
            .send(message)
            .context("Failed to send email via SMTP")
    }
}
