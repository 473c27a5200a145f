//! LDPC-Staircase erasure codec.
//!
//! The parity check matrix is [H1 | H2]: H1 sprinkles three ones per source
//! column using a deterministic PRNG, H2 is the staircase double diagonal.
//! That makes encoding a running xor and decoding an iterative peel: keep
//! solving equations that have exactly one unknown left.  Unlike
//! Reed-Solomon this is not MDS, but it is all xor and scales to big
//! blocks.
use crate::common::status::Status;

/// ones per source column in H1
const N1: usize = 3;
/// matrix seed shared by sender and receiver
const SEED: u32 = 1297;

/// Park-Miller minimal standard generator, the one RFC 5170 builds on
struct Prng {
    state: u32,
}

impl Prng {
    fn new(seed: u32) -> Prng {
        let mut state = seed % 0x7FFF_FFFF;
        if state == 0 {
            state = 1;
        }
        Prng { state: state }
    }
    fn next(&mut self) -> u32 {
        self.state = ((self.state as u64 * 16807) % 0x7FFF_FFFF) as u32;
        self.state
    }
    fn below(&mut self, m: u32) -> u32 {
        self.next() % m
    }
}

fn xor_into(acc: &mut [u8], data: &[u8]) -> () {
    for (a, d) in acc.iter_mut().zip(data.iter()) {
        *a ^= d;
    }
}

pub struct LdpcCodec {
    nbsrc: usize,
    nbrpr: usize,
    /// source columns present in each parity row
    rows: Vec<Vec<usize>>,
}

impl LdpcCodec {
    pub fn new(nbsrc: usize, nbrpr: usize) -> Result<LdpcCodec, Status> {
        if nbsrc == 0 || nbrpr == 0 {
            return Err(Status::BadOperation);
        }
        let mut prng = Prng::new(SEED ^ (nbsrc as u32) << 16 ^ nbrpr as u32);
        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); nbrpr];
        for col in 0..nbsrc {
            let mut picked: Vec<usize> = Vec::new();
            while picked.len() < N1.min(nbrpr) {
                let row = prng.below(nbrpr as u32) as usize;
                if !picked.contains(&row) {
                    picked.push(row);
                    rows[row].push(col);
                }
            }
        }
        // a parity row with no sources would make its repair useless
        for row in rows.iter_mut() {
            if row.is_empty() {
                row.push(prng.below(nbsrc as u32) as usize);
            }
        }
        Ok(LdpcCodec {
            nbsrc: nbsrc,
            nbrpr: nbrpr,
            rows: rows,
        })
    }
    pub fn nbsrc(&self) -> usize {
        self.nbsrc
    }
    pub fn nbrpr(&self) -> usize {
        self.nbrpr
    }

    /// staircase encode: p_i = xor(sources in row i) ^ p_{i-1}
    pub fn encode(&self, sources: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, Status> {
        if sources.len() != self.nbsrc {
            return Err(Status::BadOperation);
        }
        let symbol_len = sources[0].len();
        if sources.iter().any(|s| s.len() != symbol_len) {
            return Err(Status::BadOperation);
        }
        let mut repairs: Vec<Vec<u8>> = Vec::with_capacity(self.nbrpr);
        for i in 0..self.nbrpr {
            let mut p = vec![0u8; symbol_len];
            for col in &self.rows[i] {
                xor_into(&mut p, &sources[*col]);
            }
            if i > 0 {
                let prev = repairs[i - 1].clone();
                xor_into(&mut p, &prev);
            }
            repairs.push(p);
        }
        Ok(repairs)
    }

    /// peel until every source is known or nothing moves anymore
    pub fn decode(
        &self,
        sources: &mut Vec<Option<Vec<u8>>>,
        repairs: &[Option<Vec<u8>>],
    ) -> Result<(), Status> {
        if sources.len() != self.nbsrc || repairs.len() != self.nbrpr {
            return Err(Status::BadOperation);
        }
        let symbol_len = match sources
            .iter()
            .flatten()
            .chain(repairs.iter().flatten())
            .next()
        {
            Some(s) => s.len(),
            None => return Err(Status::NoData),
        };
        let mut parity: Vec<Option<Vec<u8>>> = repairs.to_vec();

        let mut progress = true;
        while progress {
            progress = false;
            for i in 0..self.nbrpr {
                // equation i: xor(sources in row i) ^ p_i ^ p_{i-1} = 0
                let mut unknown_sources: Vec<usize> = Vec::new();
                for col in &self.rows[i] {
                    if sources[*col].is_none() {
                        unknown_sources.push(*col);
                    }
                }
                let mut unknown_parities: Vec<usize> = Vec::new();
                if parity[i].is_none() {
                    unknown_parities.push(i);
                }
                if i > 0 && parity[i - 1].is_none() {
                    unknown_parities.push(i - 1);
                }
                if unknown_sources.len() + unknown_parities.len() != 1 {
                    continue;
                }
                let mut value = vec![0u8; symbol_len];
                for col in &self.rows[i] {
                    if let Some(s) = &sources[*col] {
                        xor_into(&mut value, s);
                    }
                }
                if let Some(p) = &parity[i] {
                    xor_into(&mut value, p);
                }
                if i > 0 {
                    if let Some(p) = &parity[i - 1] {
                        xor_into(&mut value, p);
                    }
                }
                if let Some(col) = unknown_sources.first() {
                    sources[*col] = Some(value);
                } else {
                    parity[unknown_parities[0]] = Some(value);
                }
                progress = true;
            }
        }

        if sources.iter().any(|s| s.is_none()) {
            return Err(Status::NoData);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_ldpc {
    use super::*;

    fn block(k: usize, len: usize) -> Vec<Vec<u8>> {
        (0..k)
            .map(|i| (0..len).map(|n| ((i * 37 + n * 11) % 253) as u8).collect())
            .collect()
    }

    #[test]
    fn matrix_is_deterministic() {
        // both ends must build the same matrix from the geometry alone
        let a = LdpcCodec::new(10, 5).unwrap();
        let b = LdpcCodec::new(10, 5).unwrap();
        assert_eq!(a.rows, b.rows);
    }
    #[test]
    fn every_row_has_sources() {
        let codec = LdpcCodec::new(20, 8).unwrap();
        assert!(codec.rows.iter().all(|r| !r.is_empty()));
    }
    #[test]
    fn parity_equations_hold() {
        // encode then check every staircase equation xors to zero
        let codec = LdpcCodec::new(10, 5).unwrap();
        let sources = block(10, 32);
        let repairs = codec.encode(&sources).unwrap();
        for i in 0..5 {
            let mut acc = vec![0u8; 32];
            for col in &codec.rows[i] {
                xor_into(&mut acc, &sources[*col]);
            }
            xor_into(&mut acc, &repairs[i]);
            if i > 0 {
                xor_into(&mut acc, &repairs[i - 1]);
            }
            assert!(acc.iter().all(|v| *v == 0));
        }
    }
    #[test]
    fn single_loss_always_recovers() {
        // one missing source with all repairs present peels in one pass
        let codec = LdpcCodec::new(10, 5).unwrap();
        let sources = block(10, 16);
        let repairs = codec.encode(&sources).unwrap();
        for lost in 0..10 {
            let mut have: Vec<Option<Vec<u8>>> = sources.iter().cloned().map(Some).collect();
            have[lost] = None;
            let rep: Vec<Option<Vec<u8>>> = repairs.iter().cloned().map(Some).collect();
            codec.decode(&mut have, &rep).unwrap();
            assert_eq!(have[lost].as_ref().unwrap(), &sources[lost]);
        }
    }
    #[test]
    fn recovery_is_exact_or_reported() {
        // multi loss either rebuilds bit exactly or says NoData, never garbage
        let codec = LdpcCodec::new(10, 5).unwrap();
        let sources = block(10, 16);
        let repairs = codec.encode(&sources).unwrap();
        for (a, b) in [(0usize, 5usize), (1, 2), (3, 9), (4, 6)] {
            let mut have: Vec<Option<Vec<u8>>> = sources.iter().cloned().map(Some).collect();
            have[a] = None;
            have[b] = None;
            let rep: Vec<Option<Vec<u8>>> = repairs.iter().cloned().map(Some).collect();
            match codec.decode(&mut have, &rep) {
                Ok(()) => {
                    assert_eq!(have[a].as_ref().unwrap(), &sources[a]);
                    assert_eq!(have[b].as_ref().unwrap(), &sources[b]);
                }
                Err(status) => assert_eq!(status, Status::NoData),
            }
        }
    }
    #[test]
    fn nothing_received_is_no_data() {
        let codec = LdpcCodec::new(4, 2).unwrap();
        let mut have: Vec<Option<Vec<u8>>> = vec![None; 4];
        let rep: Vec<Option<Vec<u8>>> = vec![None; 2];
        assert_eq!(codec.decode(&mut have, &rep), Err(Status::NoData));
    }
}
