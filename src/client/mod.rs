//! Request/response client for the appliance daemon.
//!
//! [`LocalClient`] owns one control-socket connection. Every operation
//! sends one framed request and reads the next packet, or for enumerations
//! the packets up to [`IS_LAST`](crate::protocol::flags::IS_LAST). The
//! socket is sequenced, so replies always arrive in request order; there is
//! never more than one request in flight.
//!
//! - [`spawn`] – remote process execution with descriptor hand-off
//! - [`register`] – application registration with progress streaming

pub mod register;
pub mod spawn;

use std::io;
use std::net::IpAddr;
use std::os::unix::io::{AsFd, BorrowedFd};

use serde::Serialize;

use crate::appliance::{ApplianceStore, InstalledApp};
use crate::config::Config;
use crate::error::{KiteError, ProtocolError, Result};
use crate::manifest::{Manifest, ManifestSummary};
use crate::protocol::{
    opcode, Attribute, ContainerKind, Packet, PersonaFlags, PersonaId, ResponseCode, SiteId,
    TokenId,
};
use crate::socket::{ControlSocket, PassedFd};

pub use register::{ProgressFn, Signature};
pub use spawn::{RemoteCommand, SpawnTarget, Stdio};

/// Identity details of a persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonaInfo {
    /// Persona id.
    pub persona_id: PersonaId,
    /// Display name, when the daemon reported one.
    pub display_name: Option<String>,
    /// Whether the persona's effective flags include superuser.
    pub superuser: bool,
}

impl PersonaInfo {
    /// The anonymous wildcard persona.
    pub fn anonymous() -> Self {
        Self {
            persona_id: PersonaId::ANONYMOUS,
            display_name: None,
            superuser: false,
        }
    }
}

/// An installed application as known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationInfo {
    /// The daemon verified the application's signature.
    pub is_signed: bool,
    /// Name of the stored manifest file.
    pub manifest_name: String,
    /// The stored manifest.
    pub manifest: Manifest,
}

/// Web-facing status of an installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStatus {
    /// Manifest summary fields.
    #[serde(flatten)]
    pub summary: ManifestSummary,
    /// The daemon verified the application's signature.
    pub is_signed: bool,
    /// Always `"installed"` for applications the daemon knows.
    pub state: &'static str,
}

/// Container behind a network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerInfo {
    /// A persona container.
    Persona(PersonaContainer),
    /// An application instance.
    AppInstance(AppInstanceContainer),
}

impl ContainerInfo {
    /// The persona the container belongs to, if any.
    pub fn persona_id(&self) -> Option<PersonaId> {
        match self {
            Self::Persona(p) => Some(p.persona_id),
            Self::AppInstance(a) => a.persona_id,
        }
    }
}

/// Persona container details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonaContainer {
    /// Owning persona.
    pub persona_id: PersonaId,
    /// Site the persona is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
    /// The session presented a password-backed credential.
    pub logged_in: bool,
    /// The session is a guest session.
    pub is_guest: bool,
    /// Tokens attached to the container.
    pub tokens: Vec<TokenId>,
}

/// Application instance details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInstanceContainer {
    /// Application the instance runs.
    pub app_url: String,
    /// Persona the instance runs for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<PersonaId>,
}

/// Connection to the appliance daemon's control socket.
#[derive(Debug)]
pub struct LocalClient {
    socket: ControlSocket,
    config: Config,
    store: ApplianceStore,
    platform: Option<String>,
    /// Spawn completions owed by dropped, still-running processes.
    stale_completions: usize,
}

impl LocalClient {
    /// Connect to the control socket under `config.appliance_dir`.
    ///
    /// A missing or inaccessible socket is [`KiteError::Permission`].
    pub fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        let path = config.control_socket_path();
        let socket = ControlSocket::connect(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                KiteError::Permission(path.clone())
            }
            _ => KiteError::Io(e),
        })?;
        log::debug!("[kite-client] connected to {}", path.display());
        Ok(Self::from_socket(socket, config.clone()))
    }

    /// Wrap an already connected socket.
    pub fn from_socket(socket: ControlSocket, config: Config) -> Self {
        let store = ApplianceStore::new(&config);
        Self {
            socket,
            config,
            store,
            platform: None,
            stale_completions: 0,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// File-backed stores under the appliance directory.
    pub fn store(&self) -> &ApplianceStore {
        &self.store
    }

    /// Close the connection.
    pub fn close(self) {
        log::debug!("[kite-client] closing control connection");
    }

    // === Transport ===

    pub(crate) fn socket_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    pub(crate) fn send_request(&mut self, op: u16, attrs: &[Attribute]) -> Result<()> {
        self.send_request_with_fds(op, attrs, Vec::new())
    }

    pub(crate) fn send_request_with_fds(
        &mut self,
        op: u16,
        attrs: &[Attribute],
        fds: Vec<PassedFd<'_>>,
    ) -> Result<()> {
        let bytes = Packet::request(op, attrs.to_vec()).encode()?;
        log::debug!(
            "[kite-client] -> {} ({} attrs, {} fds)",
            opcode::name(op),
            attrs.len(),
            fds.len()
        );
        self.socket.send_with_fds(&bytes, fds)?;
        Ok(())
    }

    /// Read one packet. `Ok(None)` means it was a stale spawn completion and
    /// has been discarded.
    pub(crate) fn recv_step(&mut self, request: u16) -> Result<Option<Packet>> {
        let bytes = self.socket.recv()?;
        let packet = Packet::parse(&bytes)?;
        let stale_op = opcode::SPAWN_PROCESS | opcode::RESPONSE;
        if self.stale_completions > 0 && packet.opcode == stale_op {
            self.stale_completions -= 1;
            log::debug!(
                "[kite-client] skipped completion of an abandoned process ({} left)",
                self.stale_completions
            );
            return Ok(None);
        }
        let expected = request | opcode::RESPONSE;
        if packet.opcode != expected {
            log::warn!(
                "[kite-client] reply opcode 0x{:04x} does not answer {}",
                packet.opcode,
                opcode::name(request)
            );
            return Err(ProtocolError::UnexpectedOpcode {
                expected,
                actual: packet.opcode,
            }
            .into());
        }
        Ok(Some(packet))
    }

    pub(crate) fn recv_reply(&mut self, request: u16) -> Result<Packet> {
        loop {
            if let Some(packet) = self.recv_step(request)? {
                return Ok(packet);
            }
        }
    }

    fn transact(&mut self, op: u16, attrs: &[Attribute]) -> Result<Packet> {
        self.send_request(op, attrs)?;
        self.recv_reply(op)
    }

    pub(crate) fn note_abandoned_process(&mut self) {
        self.stale_completions += 1;
    }

    #[cfg(test)]
    pub(crate) fn stale_completions(&self) -> usize {
        self.stale_completions
    }

    // === Operations ===

    /// The daemon's system type, `None` when it reports not-found.
    pub fn system_type(&mut self) -> Result<Option<String>> {
        let reply = self.transact(opcode::SYSTEM_INFO, &[])?;
        if !found(&reply)? {
            return Ok(None);
        }
        let system_type = reply
            .find(|a| match a {
                Attribute::SystemType(s) => Some(s.clone()),
                _ => None,
            })
            .ok_or(ProtocolError::MissingAttribute("system-type"))?;
        Ok(Some(system_type))
    }

    /// Platform identifier for picking manifest builds: the configured
    /// system type, otherwise the daemon's (asked once per client).
    pub fn platform(&mut self) -> Result<Option<String>> {
        if let Some(configured) = &self.config.system_type {
            return Ok(Some(configured.clone()));
        }
        if self.platform.is_none() {
            self.platform = self.system_type()?;
        }
        Ok(self.platform.clone())
    }

    /// Create a persona and return its id.
    pub fn create_persona(
        &mut self,
        display_name: &str,
        password: &str,
        superuser: bool,
    ) -> Result<PersonaId> {
        let mut attrs = vec![
            Attribute::PersonaDisplayName(display_name.to_owned()),
            Attribute::PersonaPassword(password.to_owned()),
        ];
        if superuser {
            attrs.push(Attribute::PersonaFlags(PersonaFlags::superuser()));
        }
        let reply = self.transact(opcode::CREATE_PERSONA, &attrs)?;
        if let Some(code) = reply.response_code() {
            if !code.is_success() {
                return Err(ProtocolError::ServerError(code).into());
            }
        }
        let id = reply.persona_id().ok_or(ProtocolError::MissingAttribute("persona-id"))?;
        log::info!("[kite-client] created persona {id}");
        Ok(id)
    }

    /// Every persona id, in the order the daemon streams them.
    pub fn list_personas(&mut self) -> Result<Vec<PersonaId>> {
        self.send_request(opcode::PERSONA_LOOKUP, &[])?;
        let mut ids = Vec::new();
        loop {
            let packet = self.recv_reply(opcode::PERSONA_LOOKUP)?;
            if let Some(code) = packet.response_code() {
                if code.is_not_found() {
                    break;
                }
                if !code.is_success() {
                    return Err(ProtocolError::ServerError(code).into());
                }
            }
            match packet.persona_id() {
                Some(id) => ids.push(id),
                None if packet.is_last() => break,
                None => return Err(ProtocolError::MissingAttribute("persona-id").into()),
            }
            if packet.is_last() {
                break;
            }
        }
        log::debug!("[kite-client] enumerated {} persona(s)", ids.len());
        Ok(ids)
    }

    /// Persona details; `None` when the daemon does not know the id.
    ///
    /// The anonymous id is always answered, even when the daemon reports
    /// not-found for it.
    pub fn get_persona_info(&mut self, persona_id: PersonaId) -> Result<Option<PersonaInfo>> {
        let reply = self.transact(opcode::PERSONA_LOOKUP, &[Attribute::PersonaId(persona_id)])?;
        if !found(&reply)? {
            return Ok(persona_id.is_anonymous().then(PersonaInfo::anonymous));
        }
        let mut info = PersonaInfo {
            persona_id,
            display_name: None,
            superuser: false,
        };
        for attr in &reply.attributes {
            match attr {
                Attribute::PersonaDisplayName(name) => info.display_name = Some(name.clone()),
                Attribute::PersonaFlags(f) if f.is_superuser() => info.superuser = true,
                _ => {}
            }
        }
        Ok(Some(info))
    }

    /// Installed application by URL, joined with its stored manifest.
    ///
    /// `None` when the daemon does not know the URL or the manifest file
    /// it names is missing.
    pub fn get_application_info(&mut self, app_url: &str) -> Result<Option<ApplicationInfo>> {
        let reply = self.transact(opcode::APP_LOOKUP, &[Attribute::AppUrl(app_url.to_owned())])?;
        if !found(&reply)? {
            return Ok(None);
        }
        let is_signed = reply.has(|a| matches!(a, Attribute::Signed));
        let manifest_name = reply
            .find(|a| match a {
                Attribute::ManifestName(name) => Some(name.clone()),
                _ => None,
            })
            .ok_or(ProtocolError::MissingAttribute("manifest-name"))?;
        let Some(manifest) = self.store.read_manifest(&manifest_name)? else {
            log::warn!(
                "[kite-client] {app_url} names manifest {manifest_name}, which is not stored"
            );
            return Ok(None);
        };
        Ok(Some(ApplicationInfo { is_signed, manifest_name, manifest }))
    }

    /// Web-facing status of an installed application.
    pub fn get_application_status(&mut self, app_url: &str) -> Result<Option<ApplicationStatus>> {
        Ok(self.get_application_info(app_url)?.map(|info| ApplicationStatus {
            summary: info.manifest.summary(),
            is_signed: info.is_signed,
            state: "installed",
        }))
    }

    /// The container behind `address`; `None` when there is none, or when
    /// it is of a kind this client does not model.
    pub fn get_container_info(&mut self, address: IpAddr) -> Result<Option<ContainerInfo>> {
        let reply = self.transact(opcode::CONTAINER_LOOKUP, &[Attribute::Address(address)])?;
        if !found(&reply)? {
            return Ok(None);
        }
        let kind = reply
            .find(|a| match a {
                Attribute::ContainerType(kind) => Some(*kind),
                _ => None,
            })
            .ok_or(ProtocolError::MissingAttribute("container-type"))?;

        match kind {
            ContainerKind::Persona => {
                let persona_id =
                    reply.persona_id().ok_or(ProtocolError::MissingAttribute("persona-id"))?;
                let site_id = reply.find(|a| match a {
                    Attribute::SiteId(site) => Some(site.clone()),
                    _ => None,
                });
                let tokens = reply
                    .attributes
                    .iter()
                    .filter_map(|a| match a {
                        Attribute::TokenId(id) => Some(*id),
                        _ => None,
                    })
                    .collect();
                Ok(Some(ContainerInfo::Persona(PersonaContainer {
                    persona_id,
                    site_id,
                    logged_in: reply.has(|a| matches!(a, Attribute::Signed)),
                    is_guest: reply.has(|a| matches!(a, Attribute::Guest)),
                    tokens,
                })))
            }
            ContainerKind::AppInstance => {
                let app_url = reply
                    .find(|a| match a {
                        Attribute::AppUrl(url) => Some(url.clone()),
                        _ => None,
                    })
                    .ok_or(ProtocolError::MissingAttribute("app-url"))?;
                Ok(Some(ContainerInfo::AppInstance(AppInstanceContainer {
                    app_url,
                    persona_id: reply.persona_id(),
                })))
            }
            ContainerKind::Other(raw) => {
                log::warn!("[kite-client] container {address} has unknown kind {raw}");
                Ok(None)
            }
        }
    }

    /// Set (or clear, with `None`) the credential of the container at
    /// `address`. The daemon's response code is returned as-is.
    pub fn update_container(
        &mut self,
        address: IpAddr,
        credential: Option<&str>,
    ) -> Result<ResponseCode> {
        let mut attrs = vec![Attribute::Address(address)];
        if let Some(credential) = credential {
            attrs.push(Attribute::Credential(credential.to_owned()));
        }
        let reply = self.transact(opcode::UPDATE_CONTAINER, &attrs)?;
        Ok(reply.require_response_code()?)
    }

    /// Installed applications from the roster file.
    pub fn installed_applications(&self) -> Result<Vec<InstalledApp>> {
        self.store.installed_apps()
    }

    /// JSON content of a stored token.
    pub fn open_token(&self, name: &str) -> Result<Option<serde_json::Value>> {
        self.store.open_token(name)
    }
}

/// Inspect a single-packet reply's response code: `Ok(true)` on success,
/// `Ok(false)` on not-found, [`ProtocolError::ServerError`] otherwise.
fn found(reply: &Packet) -> std::result::Result<bool, ProtocolError> {
    let code = reply.require_response_code()?;
    if code.is_success() {
        Ok(true)
    } else if code.is_not_found() {
        Ok(false)
    } else {
        Err(ProtocolError::ServerError(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{frame, Id32};
    use std::net::Ipv4Addr;

    fn pair() -> (LocalClient, ControlSocket) {
        let (ours, theirs) = ControlSocket::pair().unwrap();
        (LocalClient::from_socket(ours, Config::new("/nonexistent")), theirs)
    }

    fn reply(daemon: &ControlSocket, op: u16, f: u16, attrs: &[Attribute]) {
        daemon.send(&frame(op | opcode::RESPONSE, f, attrs).unwrap()).unwrap();
    }

    #[test]
    fn reply_without_response_bit_is_rejected() {
        let (mut client, daemon) = pair();
        let ok = [Attribute::ResponseCode(ResponseCode::SUCCESS)];
        daemon.send(&frame(opcode::SYSTEM_INFO, 0, &ok).unwrap()).unwrap();
        let err = client.system_type().unwrap_err();
        assert!(matches!(
            err,
            KiteError::Protocol(ProtocolError::UnexpectedOpcode {
                expected: 0x8500,
                actual: 0x0500,
            })
        ));
    }

    #[test]
    fn platform_prefers_config_and_caches_daemon_answer() {
        let (ours, daemon) = ControlSocket::pair().unwrap();
        let mut config = Config::new("/nonexistent");
        config.system_type = Some("aarch64-linux".into());
        let mut client = LocalClient::from_socket(ours, config);
        assert_eq!(client.platform().unwrap().as_deref(), Some("aarch64-linux"));

        let (mut client, daemon2) = pair();
        drop(daemon);
        reply(
            &daemon2,
            opcode::SYSTEM_INFO,
            0,
            &[
                Attribute::ResponseCode(ResponseCode::SUCCESS),
                Attribute::SystemType("x86_64-linux".into()),
            ],
        );
        assert_eq!(client.platform().unwrap().as_deref(), Some("x86_64-linux"));
        // Second call is served from the cache: no reply is queued.
        assert_eq!(client.platform().unwrap().as_deref(), Some("x86_64-linux"));
    }

    #[test]
    fn anonymous_persona_survives_not_found() {
        let (mut client, daemon) = pair();
        let nf = [Attribute::ResponseCode(ResponseCode::NOT_FOUND)];
        reply(&daemon, opcode::PERSONA_LOOKUP, 0, &nf);
        reply(&daemon, opcode::PERSONA_LOOKUP, 0, &nf);
        assert_eq!(
            client.get_persona_info(Id32::ANONYMOUS).unwrap(),
            Some(PersonaInfo::anonymous())
        );
        assert_eq!(client.get_persona_info(Id32([1; 32])).unwrap(), None);
    }

    #[test]
    fn persona_info_reads_flags() {
        let (mut client, daemon) = pair();
        reply(
            &daemon,
            opcode::PERSONA_LOOKUP,
            0,
            &[
                Attribute::ResponseCode(ResponseCode::SUCCESS),
                Attribute::PersonaDisplayName("Ada".into()),
                Attribute::PersonaFlags(PersonaFlags { set: 1, unset: 0 }),
            ],
        );
        let info = client.get_persona_info(Id32([2; 32])).unwrap().unwrap();
        assert_eq!(info.display_name.as_deref(), Some("Ada"));
        assert!(info.superuser);
    }

    #[test]
    fn container_lookup_requires_kind() {
        let (mut client, daemon) = pair();
        reply(
            &daemon,
            opcode::CONTAINER_LOOKUP,
            0,
            &[Attribute::ResponseCode(ResponseCode::SUCCESS)],
        );
        let err = client.get_container_info(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))).unwrap_err();
        assert!(matches!(
            err,
            KiteError::Protocol(ProtocolError::MissingAttribute("container-type"))
        ));
    }

    #[test]
    fn stale_spawn_completion_is_skipped() {
        let (mut client, daemon) = pair();
        client.note_abandoned_process();
        reply(
            &daemon,
            opcode::SPAWN_PROCESS,
            0,
            &[Attribute::ResponseCode(ResponseCode::SUCCESS), Attribute::ExitCode(0)],
        );
        reply(
            &daemon,
            opcode::SYSTEM_INFO,
            0,
            &[Attribute::ResponseCode(ResponseCode::NOT_FOUND)],
        );
        assert_eq!(client.system_type().unwrap(), None);
        assert_eq!(client.stale_completions, 0);
    }
}
