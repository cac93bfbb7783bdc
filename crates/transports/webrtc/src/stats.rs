//! Connection diagnostics
//!
//! One walk over the engine's stats report yields the connection identifier
//! and the address of the remote candidate seen for each candidate type.
//! The engine report is first normalised into [`StatsSample`]s so extraction
//! stays a pure function.

use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use webrtc::ice::candidate::CandidateType;
use webrtc::ice_transport::ice_candidate_pair::RTCIceCandidatePair;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::stats::{ICECandidateStats, StatsReportType};

/// Remote candidate category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateCategory {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

impl CandidateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateCategory::Host => "host",
            CandidateCategory::ServerReflexive => "server-reflexive",
            CandidateCategory::PeerReflexive => "peer-reflexive",
            CandidateCategory::Relay => "relay",
        }
    }

    fn from_engine(kind: CandidateType) -> Option<Self> {
        match kind {
            CandidateType::Host => Some(CandidateCategory::Host),
            CandidateType::ServerReflexive => Some(CandidateCategory::ServerReflexive),
            CandidateType::PeerReflexive => Some(CandidateCategory::PeerReflexive),
            CandidateType::Relay => Some(CandidateCategory::Relay),
            _ => None,
        }
    }

    fn from_rtc(kind: RTCIceCandidateType) -> Option<Self> {
        match kind {
            RTCIceCandidateType::Host => Some(CandidateCategory::Host),
            RTCIceCandidateType::Srflx => Some(CandidateCategory::ServerReflexive),
            RTCIceCandidateType::Prflx => Some(CandidateCategory::PeerReflexive),
            RTCIceCandidateType::Relay => Some(CandidateCategory::Relay),
            _ => None,
        }
    }
}

impl std::fmt::Display for CandidateCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate as it appears in the stats report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSample {
    pub id: String,
    /// `None` for candidate types outside the four known categories
    pub kind: Option<CandidateCategory>,
    pub address: String,
    pub port: u16,
}

impl From<&ICECandidateStats> for CandidateSample {
    fn from(stats: &ICECandidateStats) -> Self {
        Self {
            id: stats.id.clone(),
            kind: CandidateCategory::from_engine(stats.candidate_type),
            address: stats.ip.clone(),
            port: stats.port,
        }
    }
}

/// One stats report entry, reduced to the fields diagnostics use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsSample {
    PeerConnection {
        id: String,
    },
    RemoteCandidate(CandidateSample),
    LocalCandidate(CandidateSample),
    CandidatePair {
        local_candidate_id: String,
        remote_candidate_id: String,
        nominated: bool,
    },
    Other,
}

impl StatsSample {
    pub fn from_report(report: &StatsReportType) -> Self {
        match report {
            StatsReportType::PeerConnection(stats) => StatsSample::PeerConnection {
                id: stats.id.clone(),
            },
            StatsReportType::RemoteCandidate(stats) => StatsSample::RemoteCandidate(stats.into()),
            StatsReportType::LocalCandidate(stats) => StatsSample::LocalCandidate(stats.into()),
            StatsReportType::CandidatePair(stats) => StatsSample::CandidatePair {
                local_candidate_id: stats.local_candidate_id.clone(),
                remote_candidate_id: stats.remote_candidate_id.clone(),
                nominated: stats.nominated,
            },
            _ => StatsSample::Other,
        }
    }
}

/// Point-in-time connection diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Connection-level stats identifier
    pub id: String,
    /// Remote candidate address per category (last seen wins)
    pub remote_candidates: HashMap<CandidateCategory, String>,
}

impl ConnectionStats {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a StatsSample>) -> Self {
        let mut stats = ConnectionStats::default();
        for sample in samples {
            match sample {
                StatsSample::PeerConnection { id } => stats.id = id.clone(),
                StatsSample::RemoteCandidate(CandidateSample {
                    kind: Some(kind),
                    address,
                    ..
                }) => {
                    stats.remote_candidates.insert(*kind, address.clone());
                }
                _ => {}
            }
        }
        stats
    }
}

/// One end of the selected pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSummary {
    pub address: String,
    pub port: u16,
    pub kind: Option<CandidateCategory>,
}

impl From<&CandidateSample> for CandidateSummary {
    fn from(sample: &CandidateSample) -> Self {
        Self {
            address: sample.address.clone(),
            port: sample.port,
            kind: sample.kind,
        }
    }
}

/// The candidate pair carrying traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedPair {
    pub local: CandidateSummary,
    pub remote: CandidateSummary,
}

impl std::fmt::Display for SelectedPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{}",
            self.local.address, self.local.port, self.remote.address, self.remote.port
        )
    }
}

/// Split one engine-rendered candidate (`udp host 10.0.0.1:5000`) into its
/// category and the `address:port[related address]` tail
fn split_rendered(text: &str) -> Option<(Option<CandidateCategory>, &str)> {
    let mut parts = text.splitn(3, ' ');
    let _protocol = parts.next()?;
    let kind = CandidateCategory::from_rtc(RTCIceCandidateType::from(parts.next()?));
    Some((kind, parts.next()?))
}

/// The related address is rendered straight after the port, so the tail must
/// be the sample's endpoint followed by nothing or by an IP address
fn is_rendered_as(tail: &str, sample: &CandidateSample) -> bool {
    let endpoint = format!("{}:{}", sample.address, sample.port);
    match tail.strip_prefix(endpoint.as_str()) {
        Some("") => true,
        Some(related) => related.parse::<IpAddr>().is_ok(),
        None => false,
    }
}

/// Resolve the pair the ICE agent selected against the stats report.
///
/// The engine pair decides which candidates are in use; the report supplies
/// their fields. Nominated flags in the report are not consulted: the agent
/// leaves them set on pairs it has switched away from.
pub fn selected_pair_from_engine(
    pair: &RTCIceCandidatePair,
    samples: &[StatsSample],
) -> Option<SelectedPair> {
    let rendered = pair.to_string();
    let (local, remote) = rendered.split_once(" <-> ")?;
    let (local_kind, local_tail) = split_rendered(local.strip_prefix("(local) ")?)?;
    let (remote_kind, remote_tail) = split_rendered(remote.strip_prefix("(remote) ")?)?;

    let local = samples.iter().find_map(|sample| match sample {
        StatsSample::LocalCandidate(c) if c.kind == local_kind && is_rendered_as(local_tail, c) => {
            Some(c.into())
        }
        _ => None,
    })?;
    let remote = samples.iter().find_map(|sample| match sample {
        StatsSample::RemoteCandidate(c)
            if c.kind == remote_kind && is_rendered_as(remote_tail, c) =>
        {
            Some(c.into())
        }
        _ => None,
    })?;

    Some(SelectedPair { local, remote })
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
    use webrtc::ice_transport::ice_protocol::RTCIceProtocol;

    fn remote(id: &str, kind: Option<CandidateCategory>, address: &str) -> StatsSample {
        StatsSample::RemoteCandidate(CandidateSample {
            id: id.to_string(),
            kind,
            address: address.to_string(),
            port: 40000,
        })
    }

    #[test]
    fn test_one_of_each_category() {
        let samples = vec![
            StatsSample::PeerConnection {
                id: "PC-1".to_string(),
            },
            remote("r1", Some(CandidateCategory::Host), "192.168.1.20"),
            remote("r2", Some(CandidateCategory::ServerReflexive), "203.0.113.7"),
            remote("r3", Some(CandidateCategory::PeerReflexive), "198.51.100.4"),
            remote("r4", Some(CandidateCategory::Relay), "192.0.2.9"),
        ];

        let stats = ConnectionStats::from_samples(&samples);
        assert_eq!(stats.id, "PC-1");
        assert_eq!(stats.remote_candidates.len(), 4);
        assert_eq!(
            stats.remote_candidates[&CandidateCategory::Host],
            "192.168.1.20"
        );
        assert_eq!(
            stats.remote_candidates[&CandidateCategory::ServerReflexive],
            "203.0.113.7"
        );
        assert_eq!(
            stats.remote_candidates[&CandidateCategory::PeerReflexive],
            "198.51.100.4"
        );
        assert_eq!(
            stats.remote_candidates[&CandidateCategory::Relay],
            "192.0.2.9"
        );
    }

    #[test]
    fn test_no_candidates() {
        let stats = ConnectionStats::from_samples(&[]);
        assert!(stats.remote_candidates.is_empty());
        assert!(stats.id.is_empty());
    }

    #[test]
    fn test_unknown_types_and_local_candidates_skipped() {
        let samples = vec![
            remote("r1", None, "10.0.0.1"),
            StatsSample::LocalCandidate(CandidateSample {
                id: "l1".to_string(),
                kind: Some(CandidateCategory::Host),
                address: "127.0.0.1".to_string(),
                port: 1,
            }),
            StatsSample::Other,
        ];
        assert!(ConnectionStats::from_samples(&samples)
            .remote_candidates
            .is_empty());
    }

    #[test]
    fn test_last_seen_wins() {
        let samples = vec![
            remote("r1", Some(CandidateCategory::Host), "10.0.0.1"),
            remote("r2", Some(CandidateCategory::Host), "10.0.0.2"),
        ];
        let stats = ConnectionStats::from_samples(&samples);
        assert_eq!(stats.remote_candidates[&CandidateCategory::Host], "10.0.0.2");
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(CandidateCategory::ServerReflexive.as_str(), "server-reflexive");
        assert_eq!(
            serde_json::to_value(CandidateCategory::PeerReflexive).unwrap(),
            "peer-reflexive"
        );
    }

    fn local(id: &str, kind: CandidateCategory, address: &str, port: u16) -> StatsSample {
        StatsSample::LocalCandidate(CandidateSample {
            id: id.to_string(),
            kind: Some(kind),
            address: address.to_string(),
            port,
        })
    }

    fn engine_candidate(typ: RTCIceCandidateType, address: &str, port: u16) -> RTCIceCandidate {
        RTCIceCandidate {
            stats_id: format!("{}-{}", address, port),
            address: address.to_string(),
            port,
            protocol: RTCIceProtocol::Udp,
            typ,
            ..Default::default()
        }
    }

    #[test]
    fn test_selected_pair_ignores_stale_nominations() {
        // Both pairs stay nominated after the agent switched from l0/r0 to l1/r1
        let samples = vec![
            StatsSample::CandidatePair {
                local_candidate_id: "l0".to_string(),
                remote_candidate_id: "r0".to_string(),
                nominated: true,
            },
            StatsSample::CandidatePair {
                local_candidate_id: "l1".to_string(),
                remote_candidate_id: "r1".to_string(),
                nominated: true,
            },
            local("l0", CandidateCategory::Host, "10.0.0.1", 1),
            local("l1", CandidateCategory::Host, "10.0.0.1", 2),
            remote("r0", Some(CandidateCategory::Host), "10.0.0.2"),
            remote("r1", Some(CandidateCategory::Relay), "192.0.2.9"),
        ];
        let current = RTCIceCandidatePair::new(
            engine_candidate(RTCIceCandidateType::Host, "10.0.0.1", 2),
            engine_candidate(RTCIceCandidateType::Relay, "192.0.2.9", 40000),
        );

        let pair = selected_pair_from_engine(&current, &samples).unwrap();
        assert_eq!(pair.to_string(), "10.0.0.1:2 <-> 192.0.2.9:40000");
        assert_eq!(pair.remote.kind, Some(CandidateCategory::Relay));
    }

    #[test]
    fn test_selected_pair_with_related_address() {
        let samples = vec![
            local("l1", CandidateCategory::ServerReflexive, "203.0.113.7", 50001),
            remote("r1", Some(CandidateCategory::Host), "127.0.0.1"),
        ];
        let mut srflx = engine_candidate(RTCIceCandidateType::Srflx, "203.0.113.7", 50001);
        srflx.related_address = "192.168.1.2".to_string();
        srflx.related_port = 50001;
        let current = RTCIceCandidatePair::new(
            srflx,
            engine_candidate(RTCIceCandidateType::Host, "127.0.0.1", 40000),
        );

        let pair = selected_pair_from_engine(&current, &samples).unwrap();
        assert_eq!(pair.local.address, "203.0.113.7");
        assert_eq!(pair.local.port, 50001);
        assert_eq!(pair.local.kind, Some(CandidateCategory::ServerReflexive));
    }

    #[test]
    fn test_selected_pair_missing_from_report() {
        let samples = vec![local("l1", CandidateCategory::Host, "127.0.0.1", 5000)];
        let current = RTCIceCandidatePair::new(
            engine_candidate(RTCIceCandidateType::Host, "127.0.0.1", 5000),
            engine_candidate(RTCIceCandidateType::Host, "127.0.0.1", 6000),
        );
        assert_eq!(selected_pair_from_engine(&current, &samples), None);
    }
}
