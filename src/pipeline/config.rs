//! everything a user can tune, as typed config structs.
//!
//! These come in from the caller fully formed; there is no file loading in
//! the core.  Defaults follow the values the CLI tools historically used.
use serde::{Deserialize, Serialize};

use crate::audio::latency_tuner::LatencyConfig;
use crate::audio::pcm::PcmFormat;
use crate::audio::resampler::{ResamplerBackend, ResamplerProfile};
use crate::audio::sample_spec::SampleSpec;
use crate::common::status::Status;
use crate::fec::codec::FecScheme;

/// endpoint roles inside a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Interface {
    AudioSource,
    AudioRepair,
    AudioControl,
}

/// wire protocols an endpoint can speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Protocol {
    Rtp,
    RtpRs8m,
    Rs8m,
    RtpLdpc,
    Ldpc,
    Rtcp,
    Rtsp,
}

impl Protocol {
    /// which FEC scheme this protocol implies
    pub fn fec_scheme(&self) -> FecScheme {
        match self {
            Protocol::RtpRs8m | Protocol::Rs8m => FecScheme::Rs8m,
            Protocol::RtpLdpc | Protocol::Ldpc => FecScheme::LdpcStaircase,
            _ => FecScheme::None,
        }
    }
    /// the interface this protocol is allowed on
    pub fn interface(&self) -> Option<Interface> {
        match self {
            Protocol::Rtp | Protocol::RtpRs8m | Protocol::RtpLdpc => Some(Interface::AudioSource),
            Protocol::Rs8m | Protocol::Ldpc => Some(Interface::AudioRepair),
            Protocol::Rtcp => Some(Interface::AudioControl),
            // session signaling lives outside the core pipeline
            Protocol::Rtsp => None,
        }
    }
}

/// check one slot's endpoint set for consistency.
///
/// With FEC the source and repair protocols must agree on the scheme; bare
/// rtp means no repair endpoint at all.  Control is always optional.
pub fn validate_endpoint_set(endpoints: &[(Interface, Protocol)]) -> Result<(), Status> {
    let mut source = None;
    let mut repair = None;
    for (iface, proto) in endpoints {
        if proto.interface() != Some(*iface) {
            return Err(Status::BadOperation);
        }
        match iface {
            Interface::AudioSource => source = Some(*proto),
            Interface::AudioRepair => repair = Some(*proto),
            Interface::AudioControl => {
                if *proto != Protocol::Rtcp {
                    return Err(Status::BadOperation);
                }
            }
        }
    }
    match (source, repair) {
        (Some(Protocol::Rtp), Some(_)) => Err(Status::BadOperation),
        (Some(Protocol::RtpRs8m), Some(Protocol::Rs8m)) => Ok(()),
        (Some(Protocol::RtpRs8m), Some(_)) => Err(Status::BadOperation),
        (Some(Protocol::RtpLdpc), Some(Protocol::Ldpc)) => Ok(()),
        (Some(Protocol::RtpLdpc), Some(_)) => Err(Status::BadOperation),
        _ => Ok(()),
    }
}

/// is the endpoint set complete enough to start streaming
pub fn endpoint_set_is_complete(endpoints: &[(Interface, Protocol)]) -> bool {
    let source = endpoints
        .iter()
        .find(|(iface, _)| *iface == Interface::AudioSource)
        .map(|(_, proto)| *proto);
    match source {
        None => false,
        Some(Protocol::Rtp) => true,
        Some(_) => endpoints
            .iter()
            .any(|(iface, _)| *iface == Interface::AudioRepair),
    }
}

/// knobs shared by both pipeline directions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonConfig {
    pub packet_spec: SampleSpec,
    pub frame_spec: SampleSpec,
    pub packet_format: PcmFormat,
    pub payload_type: u8,
    /// per-channel samples per packet, derived from packet-len
    pub samples_per_packet: usize,
    /// per-channel samples per frame exchange with the device side
    pub samples_per_frame: usize,
    pub max_packet_size: usize,
    pub max_frame_size: usize,
    pub fec_scheme: FecScheme,
    pub fec_nbsrc: usize,
    pub fec_nbrpr: usize,
    pub resampler_backend: ResamplerBackend,
    pub resampler_profile: ResamplerProfile,
    /// SO_REUSEADDR for the I/O layer; never honored on ephemeral binds
    pub reuseaddr: bool,
    pub io_latency_ns: i64,
}

impl Default for CommonConfig {
    fn default() -> CommonConfig {
        CommonConfig {
            packet_spec: SampleSpec::new(48000, 2),
            frame_spec: SampleSpec::new(48000, 2),
            packet_format: PcmFormat::S16Be,
            payload_type: 10,
            samples_per_packet: 240, // 5ms at 48k
            samples_per_frame: 480,  // 10ms at 48k
            max_packet_size: 2048,
            max_frame_size: 8192,
            fec_scheme: FecScheme::None,
            fec_nbsrc: 10,
            fec_nbrpr: 5,
            resampler_backend: ResamplerBackend::Default,
            resampler_profile: ResamplerProfile::Medium,
            reuseaddr: false,
            io_latency_ns: 20_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SenderConfig {
    pub common: CommonConfig,
    pub cname: String,
    pub source_id: u32,
    /// spread packets inside a window before shipping
    pub interleaving: bool,
}

impl Default for SenderConfig {
    fn default() -> SenderConfig {
        SenderConfig {
            common: CommonConfig::default(),
            cname: String::from("sender@rtstream"),
            source_id: 0x5E4D0001,
            interleaving: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiverConfig {
    pub common: CommonConfig,
    pub cname: String,
    pub local_source_id: u32,
    pub latency: LatencyConfig,
    pub no_playback_timeout_us: u128,
}

impl Default for ReceiverConfig {
    fn default() -> ReceiverConfig {
        ReceiverConfig {
            common: CommonConfig::default(),
            cname: String::from("receiver@rtstream"),
            local_source_id: 0x4EC50001,
            latency: LatencyConfig::default(),
            no_playback_timeout_us: 2_000_000,
        }
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    #[test]
    fn protocol_scheme_mapping() {
        assert_eq!(Protocol::Rtp.fec_scheme(), FecScheme::None);
        assert_eq!(Protocol::RtpRs8m.fec_scheme(), FecScheme::Rs8m);
        assert_eq!(Protocol::Ldpc.fec_scheme(), FecScheme::LdpcStaircase);
    }
    #[test]
    fn valid_sets() {
        assert!(validate_endpoint_set(&[(Interface::AudioSource, Protocol::Rtp)]).is_ok());
        assert!(validate_endpoint_set(&[
            (Interface::AudioSource, Protocol::RtpRs8m),
            (Interface::AudioRepair, Protocol::Rs8m),
            (Interface::AudioControl, Protocol::Rtcp),
        ])
        .is_ok());
    }
    #[test]
    fn bare_rtp_refuses_repair() {
        assert_eq!(
            validate_endpoint_set(&[
                (Interface::AudioSource, Protocol::Rtp),
                (Interface::AudioRepair, Protocol::Rs8m),
            ]),
            Err(Status::BadOperation)
        );
    }
    #[test]
    fn mixed_schemes_refused() {
        assert_eq!(
            validate_endpoint_set(&[
                (Interface::AudioSource, Protocol::RtpRs8m),
                (Interface::AudioRepair, Protocol::Ldpc),
            ]),
            Err(Status::BadOperation)
        );
    }
    #[test]
    fn wrong_interface_refused() {
        assert_eq!(
            validate_endpoint_set(&[(Interface::AudioRepair, Protocol::Rtp)]),
            Err(Status::BadOperation)
        );
        // rtsp is signaling, not a pipeline endpoint
        assert_eq!(
            validate_endpoint_set(&[(Interface::AudioSource, Protocol::Rtsp)]),
            Err(Status::BadOperation)
        );
    }
    #[test]
    fn completeness() {
        assert!(!endpoint_set_is_complete(&[]));
        assert!(endpoint_set_is_complete(&[(
            Interface::AudioSource,
            Protocol::Rtp
        )]));
        assert!(!endpoint_set_is_complete(&[(
            Interface::AudioSource,
            Protocol::RtpRs8m
        )]));
        assert!(endpoint_set_is_complete(&[
            (Interface::AudioSource, Protocol::RtpRs8m),
            (Interface::AudioRepair, Protocol::Rs8m),
        ]));
    }
}
