//! Negotiation engine factory
//!
//! Builds a configured `webrtc` API instance for one side of a connection.
//! Both roles share codec and interceptor registration, loopback candidates,
//! the relay acceptance delay and the IPv4-only filter. They differ in how
//! they take part in multicast DNS discovery.
//!
//! # Known limitation
//!
//! Only IPv4 candidates are gathered or accepted. The RPC layer addresses
//! peers with plain socket literals and cannot carry IPv6 scoped addresses
//! (zone identifiers), so IPv6 paths are filtered out at the engine.

use crate::{Error, Result};
use std::net::IpAddr;
use std::sync::Once;
use std::time::Duration;
use tracing::debug;
use tracing_log::log::LevelFilter;
use tracing_log::LogTracer;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::interceptor::registry::Registry;

/// How long relay candidates are held back so a direct path can win
pub const RELAY_ACCEPTANCE_MIN_WAIT: Duration = Duration::from_secs(3);

/// Which side of the connection this engine serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dials: creates the initial offer (the RPC client)
    Initiator,
    /// Answers the initial offer and drives renegotiation (the RPC server)
    Responder,
}

/// Multicast DNS participation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Resolve peers' `.local` names but never publish our own
    QueryOnly,
    /// Resolve peers' names and advertise our host candidates under `.local` names
    QueryAndGather,
}

impl From<DiscoveryMode> for MulticastDnsMode {
    fn from(mode: DiscoveryMode) -> Self {
        match mode {
            DiscoveryMode::QueryOnly => MulticastDnsMode::QueryOnly,
            DiscoveryMode::QueryAndGather => MulticastDnsMode::QueryAndGather,
        }
    }
}

/// Options for engine construction
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Forward the engine's internal ICE/DTLS/SCTP logging into `tracing`
    pub verbose: bool,
}

/// Network behaviour applied to the engine for a given role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Multicast DNS participation
    pub discovery: DiscoveryMode,
    /// Gather loopback candidates so co-located processes can connect offline
    pub include_loopback: bool,
    /// Minimum wait before a relay candidate may be selected
    pub relay_acceptance_min_wait: Duration,
    /// Restrict candidates to IPv4
    pub ipv4_only: bool,
}

impl EngineSettings {
    /// Settings for `role`.
    ///
    /// The initiator both queries and advertises `.local` names. The responder
    /// only queries: the initiator's loopback address may be hidden behind an
    /// mDNS name while the responder offers 127.0.0.1 directly.
    pub fn for_role(role: Role) -> Self {
        let discovery = match role {
            Role::Initiator => DiscoveryMode::QueryAndGather,
            Role::Responder => DiscoveryMode::QueryOnly,
        };

        Self {
            discovery,
            include_loopback: true,
            relay_acceptance_min_wait: RELAY_ACCEPTANCE_MIN_WAIT,
            ipv4_only: true,
        }
    }

    /// Build the engine's setting engine from these settings
    pub fn setting_engine(&self) -> SettingEngine {
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(self.discovery.into());
        setting_engine.set_include_loopback_candidate(self.include_loopback);
        setting_engine.set_relay_acceptance_min_wait(Some(self.relay_acceptance_min_wait));
        if self.ipv4_only {
            setting_engine.set_ip_filter(Box::new(is_allowed_address));
        }
        setting_engine
    }
}

/// IP filter: only IPv4 interfaces produce candidates
pub fn is_allowed_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => true,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some(),
    }
}

/// Build a negotiation engine for `role`
///
/// # Errors
///
/// Returns [`Error::EngineConstruction`] if codec or interceptor registration fails.
pub fn build_api(role: Role, options: &EngineOptions) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::EngineConstruction(format!("Failed to register codecs: {}", e)))?;

    let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| {
            Error::EngineConstruction(format!("Failed to register interceptors: {}", e))
        })?;

    if options.verbose {
        install_engine_log_bridge();
    }

    let settings = EngineSettings::for_role(role);
    debug!(?role, ?settings, "building negotiation engine");

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .with_setting_engine(settings.setting_engine())
        .build())
}

static INSTALL_LOG_BRIDGE: Once = Once::new();

/// Route the engine's `log` records into `tracing`, once per process.
///
/// A subscriber built with tracing-subscriber's `tracing-log` feature may
/// already own the bridge; the engine then keeps using it.
fn install_engine_log_bridge() {
    INSTALL_LOG_BRIDGE.call_once(|| {
        if let Err(e) = LogTracer::init_with_filter(LevelFilter::Debug) {
            debug!(error = %e, "a log backend is already installed; engine diagnostics go there");
        }
    });
}
