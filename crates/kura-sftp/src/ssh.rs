//! SSH transport for the SFTP backend.
//!
//! Uses russh with password authentication. The server's host key must match
//! the key pinned in the connection string; there is no trust-on-first-use.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use std::fmt;
use std::sync::Arc;

use russh::client::{self, Config, Handle};
use russh::keys::{HashAlg, PublicKey};
use russh::Disconnect;
use russh_sftp::client::SftpSession;

use kura_core::{ConnectionTarget, StoreError};

use crate::constants::{
    DEFAULT_SFTP_PORT, SFTP_SUBSYSTEM, SSH_INACTIVITY_TIMEOUT, SSH_KEEPALIVE_INTERVAL,
    SSH_KEEPALIVE_MAX,
};

/// SSH connection configuration
#[derive(Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// The only server key the handshake accepts.
    pub host_key: PublicKey,
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("host_key", &self.host_key.fingerprint(HashAlg::Sha256))
            .finish_non_exhaustive()
    }
}

impl SshConfig {
    /// Read host, credentials and the pinned `host_key` from a connection
    /// string. The user defaults to the local login name.
    pub fn from_target(target: &ConnectionTarget) -> Result<Self, SshError> {
        let host = target
            .host
            .clone()
            .ok_or_else(|| SshError::InvalidConfig("sftp:// needs a host".into()))?;
        let password = target
            .password
            .clone()
            .ok_or_else(|| SshError::InvalidConfig("sftp:// needs a password".into()))?;
        let encoded = target
            .option("host_key")
            .ok_or_else(|| SshError::InvalidConfig("sftp:// needs a host_key option".into()))?;

        Ok(Self {
            host,
            port: target.port.unwrap_or(DEFAULT_SFTP_PORT),
            username: target.user.clone().unwrap_or_else(whoami::username),
            password,
            host_key: decode_host_key(encoded)?,
        })
    }
}

/// Decode a URL-safe base64 SSH wire-format public key, padded or not.
pub fn decode_host_key(encoded: &str) -> Result<PublicKey, SshError> {
    let bytes = URL_SAFE
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|e| SshError::InvalidConfig(format!("host_key is not base64url: {e}")))?;
    PublicKey::from_bytes(&bytes)
        .map_err(|e| SshError::InvalidConfig(format!("host_key is not an SSH public key: {e}")))
}

/// Client handler for russh - rejects every server key but the pinned one
struct ClientHandler {
    expected: PublicKey,
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if server_public_key.key_data() == self.expected.key_data() {
            tracing::debug!(
                fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
                "server key matches pinned host key"
            );
            Ok(true)
        } else {
            tracing::warn!(
                offered = %server_public_key.fingerprint(HashAlg::Sha256),
                expected = %self.expected.fingerprint(HashAlg::Sha256),
                "rejecting server key"
            );
            Ok(false)
        }
    }
}

/// SSH client wrapper
pub struct SshClient {
    config: SshConfig,
    session: Option<Handle<ClientHandler>>,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Connect, authenticate with the password, and start the SFTP subsystem.
    pub async fn connect(&mut self) -> Result<SftpSession, SshError> {
        let config = Config {
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            keepalive_interval: Some(SSH_KEEPALIVE_INTERVAL),
            keepalive_max: SSH_KEEPALIVE_MAX,
            ..<_>::default()
        };

        let handler = ClientHandler {
            expected: self.config.host_key.clone(),
        };
        let addr = (self.config.host.as_str(), self.config.port);
        let mut session = client::connect(Arc::new(config), addr, handler).await?;

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "connected, attempting authentication"
        );

        let auth = session
            .authenticate_password(&self.config.username, &self.config.password)
            .await?;
        if !auth.success() {
            return Err(SshError::AuthFailed(format!(
                "password rejected for {:?}",
                self.config.username
            )));
        }
        tracing::info!(user = %self.config.username, "authenticated");

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelFailed(format!("session: {e}")))?;
        channel
            .request_subsystem(true, SFTP_SUBSYSTEM)
            .await
            .map_err(|e| SshError::ChannelFailed(format!("{SFTP_SUBSYSTEM} subsystem: {e}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::Sftp(e.to_string()))?;

        self.session = Some(session);
        Ok(sftp)
    }

    /// Disconnect from the server
    pub async fn disconnect(&mut self) -> Result<(), SshError> {
        if let Some(session) = self.session.take() {
            session
                .disconnect(Disconnect::ByApplication, "Client disconnecting", "en")
                .await?;
        }
        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map(|s| !s.is_closed()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SshError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Auth failed: {0}")]
    AuthFailed(String),
    #[error("Channel failed: {0}")]
    ChannelFailed(String),
    #[error("SFTP session failed: {0}")]
    Sftp(String),
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::ConnectionFailed(e.to_string())
    }
}

impl From<SshError> for StoreError {
    fn from(e: SshError) -> Self {
        match e {
            SshError::InvalidConfig(msg) => StoreError::invalid_input(msg),
            other => StoreError::connection_failed(other.to_string()),
        }
    }
}
