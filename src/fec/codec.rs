//! picks and wraps one of the block codecs behind a single face.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::status::Status;
use crate::fec::ldpc::LdpcCodec;
use crate::fec::rs8m::Rs8mCodec;

/// which recovery scheme a slot runs, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum FecScheme {
    None,
    Rs8m,
    LdpcStaircase,
}

impl fmt::Display for FecScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FecScheme::None => write!(f, "none"),
            FecScheme::Rs8m => write!(f, "rs8m"),
            FecScheme::LdpcStaircase => write!(f, "ldpc"),
        }
    }
}

/// one of the two codecs, same calls either way
pub enum BlockCodec {
    Rs8m(Rs8mCodec),
    Ldpc(LdpcCodec),
}

impl BlockCodec {
    /// build the codec for a scheme, None when the scheme is FecScheme::None
    pub fn new(scheme: FecScheme, nbsrc: usize, nbrpr: usize) -> Result<Option<BlockCodec>, Status> {
        match scheme {
            FecScheme::None => Ok(None),
            FecScheme::Rs8m => Ok(Some(BlockCodec::Rs8m(Rs8mCodec::new(nbsrc, nbrpr)?))),
            FecScheme::LdpcStaircase => Ok(Some(BlockCodec::Ldpc(LdpcCodec::new(nbsrc, nbrpr)?))),
        }
    }
    pub fn nbsrc(&self) -> usize {
        match self {
            BlockCodec::Rs8m(c) => c.nbsrc(),
            BlockCodec::Ldpc(c) => c.nbsrc(),
        }
    }
    pub fn nbrpr(&self) -> usize {
        match self {
            BlockCodec::Rs8m(c) => c.nbrpr(),
            BlockCodec::Ldpc(c) => c.nbrpr(),
        }
    }
    pub fn encode(&self, sources: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, Status> {
        match self {
            BlockCodec::Rs8m(c) => c.encode(sources),
            BlockCodec::Ldpc(c) => c.encode(sources),
        }
    }
    pub fn decode(
        &self,
        sources: &mut Vec<Option<Vec<u8>>>,
        repairs: &[Option<Vec<u8>>],
    ) -> Result<(), Status> {
        match self {
            BlockCodec::Rs8m(c) => c.decode(sources, repairs),
            BlockCodec::Ldpc(c) => c.decode(sources, repairs),
        }
    }
}

#[cfg(test)]
mod test_codec {
    use super::*;

    #[test]
    fn scheme_none_builds_nothing() {
        assert!(BlockCodec::new(FecScheme::None, 10, 5).unwrap().is_none());
    }
    #[test]
    fn both_schemes_round_trip() {
        // same data through both codecs, same answer
        for scheme in [FecScheme::Rs8m, FecScheme::LdpcStaircase] {
            let codec = BlockCodec::new(scheme, 8, 4).unwrap().unwrap();
            let sources: Vec<Vec<u8>> = (0..8).map(|i| vec![i as u8; 24]).collect();
            let repairs = codec.encode(&sources).unwrap();
            assert_eq!(repairs.len(), 4);
            let mut have: Vec<Option<Vec<u8>>> = sources.iter().cloned().map(Some).collect();
            have[3] = None;
            let rep: Vec<Option<Vec<u8>>> = repairs.into_iter().map(Some).collect();
            codec.decode(&mut have, &rep).unwrap();
            assert_eq!(have[3].as_ref().unwrap(), &sources[3]);
        }
    }
}
