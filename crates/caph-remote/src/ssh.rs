use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caph_domain::Fingerprint;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::RemoteError;

/// Timeout budget for the TCP+key-exchange phase. Distinct from the exec
/// timeout below — a host that never completes a handshake should fail
/// fast rather than tie up a reconcile worker.
const DIAL_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout budget for a single command's round trip once the session is up.
const EXEC_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// The outcome of a single command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_status: Option<u32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Records the host key the server presented during the handshake so the
/// caller can correlate it against the vendor-reported fingerprint. This
/// crate does not maintain a known-hosts file — every reconcile connects
/// fresh and compares fingerprints explicitly instead.
struct FingerprintCapture {
    captured: std::sync::Mutex<Option<Fingerprint>>,
}

#[async_trait]
impl client::Handler for FingerprintCapture {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fp = Fingerprint::of(server_public_key.to_bytes().unwrap_or_default().as_slice());
        *self.captured.lock().unwrap() = Some(fp);
        Ok(true)
    }
}

/// A single, short-lived SSH connection. No pooling across reconciles —
/// every call dials fresh, which keeps the state machine simple at the
/// cost of a TCP+handshake round trip per use.
pub struct SshClient;

impl SshClient {
    /// Connect, authenticate with `private_key`, and capture the fingerprint
    /// the server presented during the handshake. Returns the fingerprint
    /// alongside the open handle so the caller can run commands without a
    /// second dial.
    async fn connect(
        host: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
    ) -> Result<(Handle<FingerprintCapture>, Fingerprint), RemoteError> {
        let key_pair = russh::keys::decode_secret_key(private_key_pem, None)
            .map_err(|e| RemoteError::Ssh(format!("invalid private key: {e}")))?;

        let handler = FingerprintCapture { captured: std::sync::Mutex::new(None) };
        let config = Arc::new(client::Config::default());

        let mut session = tokio::time::timeout(
            DIAL_TIMEOUT,
            client::connect(config, (host, port), handler),
        )
        .await
        .map_err(|_| RemoteError::SshTimeout)?
        .map_err(|e| RemoteError::Ssh(e.to_string()))?;

        let auth = session
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key_pair), None))
            .await
            .map_err(|e| RemoteError::Ssh(e.to_string()))?;
        if !auth.success() {
            return Err(RemoteError::Ssh("public key authentication rejected".into()));
        }

        let fingerprint = session
            .handler()
            .captured
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RemoteError::Ssh("server key was never presented".into()))?;

        Ok((session, fingerprint))
    }

    /// Dial `host:port`, authenticate, and run `command` to completion,
    /// returning both the output and the fingerprint the server presented.
    pub async fn exec(
        host: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        command: &str,
    ) -> Result<(CommandOutput, Fingerprint), RemoteError> {
        let (session, fingerprint) = Self::connect(host, port, user, private_key_pem).await?;
        let output = tokio::time::timeout(EXEC_TIMEOUT, Self::run(&session, command))
            .await
            .map_err(|_| RemoteError::Timeout(format!("exec '{command}' on {host}:{port}")))??;
        Ok((output, fingerprint))
    }

    /// Dial and authenticate only — used to confirm a host is reachable on
    /// a given port (the two-port cloud-init predicate) without running a
    /// command.
    pub async fn probe(host: &str, port: u16, user: &str, private_key_pem: &str) -> Result<Fingerprint, RemoteError> {
        let (_session, fingerprint) = Self::connect(host, port, user, private_key_pem).await?;
        Ok(fingerprint)
    }

    async fn run(session: &Handle<FingerprintCapture>, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Ssh(e.to_string()))?;
        channel.exec(true, command).await.map_err(|e| RemoteError::Ssh(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        loop {
            let Some(msg) = channel.wait().await else { break };
            match msg {
                russh::ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                russh::ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                russh::ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                russh::ChannelMsg::Eof | russh::ChannelMsg::Close => break,
                _ => {}
            }
        }
        debug!(command, exit_status, "ssh exec completed");
        Ok(CommandOutput { exit_status, stdout, stderr })
    }

    /// Upload `contents` to `remote_path` over SFTP, for post-install
    /// cloud-init user-data delivery onto a partition-labeled device.
    pub async fn upload_file(
        host: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        remote_path: &str,
        contents: &[u8],
    ) -> Result<(), RemoteError> {
        let (session, _fingerprint) = Self::connect(host, port, user, private_key_pem).await?;
        let channel = session.channel_open_session().await.map_err(|e| RemoteError::Ssh(e.to_string()))?;
        channel.request_subsystem(true, "sftp").await.map_err(|e| RemoteError::Ssh(e.to_string()))?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RemoteError::Ssh(e.to_string()))?;
        let mut file = sftp
            .create(remote_path)
            .await
            .map_err(|e| RemoteError::Ssh(e.to_string()))?;
        file.write_all(contents).await.map_err(|e| RemoteError::Ssh(e.to_string()))?;
        file.shutdown().await.map_err(|e| RemoteError::Ssh(e.to_string()))?;
        Ok(())
    }
}
