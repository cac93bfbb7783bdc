//! Configuration types for establishing peer connections

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Default STUN server used when the caller supplies no list of its own.
///
/// There is no guarantee this server remains usable; deployments should pass
/// their own servers.
pub const DEFAULT_STUN_URL: &str = "stun:global.stun.twilio.com:3478";

/// The default set of ICE servers for session negotiation
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![DEFAULT_STUN_URL.to_string()],
        username: None,
        credential: None,
    }]
}

/// Configuration for one side of a peer connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeerConfig {
    /// STUN/TURN servers used during candidate gathering
    pub ice_servers: Vec<IceServerConfig>,

    /// Gather every candidate before returning a complete local description
    /// instead of trickling candidates over the signaling channel
    pub disable_trickle: bool,

    /// Upper bound on the blocking candidate gather (in addition to the
    /// caller's context). None waits for the context only.
    pub gather_timeout_ms: Option<u64>,
}

/// A single STUN or TURN server entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceServerConfig {
    /// Server URLs (stun:, stuns:, turn:, turns:)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            disable_trickle: false,
            gather_timeout_ms: None,
        }
    }
}

impl PeerConfig {
    /// Configuration with no ICE servers: host and loopback candidates only
    pub fn local_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any ICE server entry is invalid (see [`IceServerConfig::validate`])
    /// - `gather_timeout_ms` is zero
    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            server.validate()?;
        }

        if self.gather_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "gather_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Gather timeout as a Duration
    pub fn gather_timeout(&self) -> Option<Duration> {
        self.gather_timeout_ms.map(Duration::from_millis)
    }

    /// Convert to the engine's peer connection configuration
    pub fn to_rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                }
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl IceServerConfig {
    /// Check the URL schemes and TURN credentials of this entry
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(Error::InvalidConfig(
                "ICE server entry must have at least one URL".to_string(),
            ));
        }

        for url in &self.urls {
            let scheme = url.split(':').next().unwrap_or_default();
            match scheme {
                "stun" | "stuns" => {}
                "turn" | "turns" => {
                    if self.username.is_none() || self.credential.is_none() {
                        return Err(Error::InvalidConfig(format!(
                            "TURN server {} requires username and credential",
                            url
                        )));
                    }
                }
                _ => {
                    return Err(Error::InvalidConfig(format!(
                        "ICE server URL must start with stun:, stuns:, turn: or turns:, got {}",
                        url
                    )));
                }
            }
        }

        Ok(())
    }
}
