use async_trait::async_trait;
use caph_domain::{Disk, Fingerprint, RebootType};
use caph_remote::{CommandOutput, RemoteError, RobotClient, RobotCredentials, RobotResetType, RobotServer, SshClient};

/// Everything a host-state-machine step needs from the outside world,
/// behind one trait so the state machine can be exercised with a fake in
/// tests instead of a real Robot server and SSH endpoint. The production
/// implementation, [`LiveTransport`], is a thin wrapper over
/// `caph-remote`'s `RobotClient` and `SshClient`.
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn get_server(&self, creds: &RobotCredentials, server_id: u64) -> Result<RobotServer, RemoteError>;

    /// The reboot mechanisms Robot reports available for this server, plus
    /// `RebootType::Ssh` which this crate always offers when a rescue/OS key
    /// is configured (discovery of `ssh` is local, not vendor-reported).
    async fn reboot_types(&self, creds: &RobotCredentials, server_id: u64) -> Result<Vec<RebootType>, RemoteError>;

    /// Upsert the rescue key vendor-side under its fingerprint. Returns
    /// `Ok(())` on success; a name collision under a *different* fingerprint
    /// surfaces as `RemoteError::Permanent` with a message the caller maps to
    /// `SSHKeyAlreadyExists`.
    async fn ensure_ssh_key(
        &self,
        creds: &RobotCredentials,
        fingerprint: &Fingerprint,
        public_key: &str,
    ) -> Result<(), RemoteError>;

    async fn set_rescue(
        &self,
        creds: &RobotCredentials,
        server_id: u64,
        authorized_keys: &[Fingerprint],
    ) -> Result<(), RemoteError>;

    async fn reboot_robot(&self, creds: &RobotCredentials, server_id: u64, kind: RobotResetType) -> Result<(), RemoteError>;

    async fn ssh_probe(&self, ip: &str, port: u16, user: &str, private_key_pem: &str) -> Result<Fingerprint, RemoteError>;

    async fn ssh_exec(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        command: &str,
    ) -> Result<CommandOutput, RemoteError>;

    /// Issue `reboot` over SSH. The session usually drops before a reply
    /// arrives, so a transport-level error here is swallowed by the caller
    /// rather than treated as reboot failure.
    async fn ssh_reboot(&self, ip: &str, port: u16, user: &str, private_key_pem: &str) -> Result<(), RemoteError>;

    async fn upload_autosetup(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        remote_path: &str,
        contents: &[u8],
    ) -> Result<(), RemoteError>;

    /// lsblk-equivalent hardware inventory, read from the rescue system.
    async fn hardware_inventory(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
    ) -> Result<Vec<Disk>, RemoteError>;

    async fn wipe_disk_headers(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        disks: &[Disk],
    ) -> Result<(), RemoteError>;

    async fn is_reachable(&self, ip: &str, port: u16) -> bool;
}

/// Production [`HostTransport`]: a Robot client plus stateless SSH calls.
#[derive(Clone, Default)]
pub struct LiveTransport {
    robot: RobotClient,
}

impl LiveTransport {
    pub fn new() -> Self {
        Self { robot: RobotClient::new() }
    }

    pub fn with_robot(robot: RobotClient) -> Self {
        Self { robot }
    }
}

#[async_trait]
impl HostTransport for LiveTransport {
    async fn get_server(&self, creds: &RobotCredentials, server_id: u64) -> Result<RobotServer, RemoteError> {
        self.robot.get_server(creds, server_id).await
    }

    async fn reboot_types(&self, creds: &RobotCredentials, server_id: u64) -> Result<Vec<RebootType>, RemoteError> {
        // Robot has no dedicated "list reset types" endpoint; every leased
        // server supports software/hardware/power resets, and `manual` is
        // always available as the ticket-based last resort. `ssh` is not
        // vendor-discovered at all — the caller adds it when a usable key
        // is configured.
        let _ = self.robot.get_server(creds, server_id).await?;
        Ok(vec![RebootType::Software, RebootType::Hardware, RebootType::Power, RebootType::Manual])
    }

    async fn ensure_ssh_key(
        &self,
        creds: &RobotCredentials,
        fingerprint: &Fingerprint,
        public_key: &str,
    ) -> Result<(), RemoteError> {
        let existing = self.robot.list_ssh_keys(creds).await?;
        if let Some(record) = existing.iter().find(|k| k.fingerprint == fingerprint.as_str()) {
            if record.name == fingerprint.as_str() {
                return Ok(());
            }
        }
        match self.robot.set_ssh_key(creds, fingerprint.as_str(), public_key).await {
            Ok(_) => Ok(()),
            Err(RemoteError::Permanent { status: 409, message }) => {
                // Two hosts racing to upsert the same fingerprint-named key
                // both see 409. Re-read: if the surviving record is ours
                // (same name), the race is benign and this call succeeded
                // in effect. Only a genuine different-name collision is an
                // error.
                let existing = self.robot.list_ssh_keys(creds).await?;
                match existing.iter().find(|k| k.fingerprint == fingerprint.as_str()) {
                    Some(record) if record.name == fingerprint.as_str() => Ok(()),
                    _ => Err(RemoteError::Permanent { status: 409, message: format!("SSHKeyAlreadyExists: {message}") }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn set_rescue(
        &self,
        creds: &RobotCredentials,
        server_id: u64,
        authorized_keys: &[Fingerprint],
    ) -> Result<(), RemoteError> {
        self.robot.set_rescue(creds, server_id, "linux", authorized_keys).await.map(|_| ())
    }

    async fn reboot_robot(&self, creds: &RobotCredentials, server_id: u64, kind: RobotResetType) -> Result<(), RemoteError> {
        self.robot.reboot(creds, server_id, kind).await
    }

    async fn ssh_probe(&self, ip: &str, port: u16, user: &str, private_key_pem: &str) -> Result<Fingerprint, RemoteError> {
        SshClient::probe(ip, port, user, private_key_pem).await
    }

    async fn ssh_exec(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        SshClient::exec(ip, port, user, private_key_pem, command).await.map(|(out, _fp)| out)
    }

    async fn ssh_reboot(&self, ip: &str, port: u16, user: &str, private_key_pem: &str) -> Result<(), RemoteError> {
        match SshClient::exec(ip, port, user, private_key_pem, "reboot").await {
            Ok(_) => Ok(()),
            // A dropped connection is the expected outcome of `reboot`
            // tearing down the session before a reply is sent.
            Err(RemoteError::Ssh(_)) | Err(RemoteError::SshTimeout) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn upload_autosetup(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        remote_path: &str,
        contents: &[u8],
    ) -> Result<(), RemoteError> {
        SshClient::upload_file(ip, port, user, private_key_pem, remote_path, contents).await
    }

    async fn hardware_inventory(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
    ) -> Result<Vec<Disk>, RemoteError> {
        let (out, _) = SshClient::exec(ip, port, user, private_key_pem, "lsblk -ndo NAME,WWN,SIZE -b").await?;
        Ok(parse_lsblk(&String::from_utf8_lossy(&out.stdout)))
    }

    async fn wipe_disk_headers(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        private_key_pem: &str,
        disks: &[Disk],
    ) -> Result<(), RemoteError> {
        for disk in disks {
            let cmd = format!("wipefs -a /dev/{}", disk.name);
            SshClient::exec(ip, port, user, private_key_pem, &cmd).await?;
        }
        Ok(())
    }

    async fn is_reachable(&self, ip: &str, port: u16) -> bool {
        caph_remote::is_reachable(ip, port, std::time::Duration::from_secs(5)).await
    }
}

/// Parse `lsblk -ndo NAME,WWN,SIZE -b` output: one disk per line, whitespace
/// separated, WWN `-` meaning "none reported" (skipped — an unset WWN can
/// never satisfy a root-device hint).
fn parse_lsblk(output: &str) -> Vec<Disk> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let wwn = parts.next()?;
            let size_bytes = parts.next()?.parse().ok()?;
            if wwn == "-" || wwn.is_empty() {
                return None;
            }
            Some(Disk { name: name.to_string(), wwn: wwn.to_string(), size_bytes })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lsblk_lines_and_skips_unreported_wwn() {
        let out = "sda 0x5000c500 1000204886016\nsdb - 1000204886016\n";
        let disks = parse_lsblk(out);
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].name, "sda");
        assert_eq!(disks[0].size_bytes, 1000204886016);
    }

    #[test]
    fn empty_output_yields_no_disks() {
        assert!(parse_lsblk("").is_empty());
    }

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> RobotCredentials {
        RobotCredentials { user: "u".into(), password: "p".into() }
    }

    #[tokio::test]
    async fn ensure_ssh_key_treats_409_as_success_when_the_re_read_name_matches() {
        let fp = Fingerprint::of(b"key-body");
        let server = MockServer::start().await;

        // The unconditional response: after the race, the surviving record
        // is ours.
        Mock::given(method("GET"))
            .and(path("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "key": { "name": fp.as_str(), "fingerprint": fp.as_str(), "type": "ed25519", "size": 256 } }
            ])))
            .mount(&server)
            .await;
        // Mounted last, so it wins on the first (and only first) GET /key
        // call: no key registered yet.
        Mock::given(method("GET"))
            .and(path("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/key"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "error": { "message": "key exists" } })))
            .mount(&server)
            .await;

        let transport = LiveTransport::with_robot(RobotClient::with_base_url(server.uri()));
        let result = transport.ensure_ssh_key(&creds(), &fp, "ssh-ed25519 AAAA").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn ensure_ssh_key_409_with_a_different_name_on_re_read_is_an_error() {
        let fp = Fingerprint::of(b"key-body");
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "key": { "name": "someone-elses-key", "fingerprint": fp.as_str(), "type": "ed25519", "size": 256 } }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/key"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "error": { "message": "key exists" } })))
            .mount(&server)
            .await;

        let transport = LiveTransport::with_robot(RobotClient::with_base_url(server.uri()));
        let err = transport.ensure_ssh_key(&creds(), &fp, "ssh-ed25519 AAAA").await.unwrap_err();
        assert!(matches!(err, RemoteError::Permanent { status: 409, .. }));
    }
}
