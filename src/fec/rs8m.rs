//! Reed-Solomon erasure codec over GF(2^8).
//!
//! Systematic: source symbols go out untouched, repair symbols are rows of
//! a Cauchy matrix applied to the block.  Any square submatrix of a Cauchy
//! matrix is invertible, which is exactly the MDS property we need: any
//! `nbsrc` surviving symbols out of `nbsrc + nbrpr` rebuild the block.
use crate::common::status::Status;
use crate::fec::gf256;

/// max total symbols per block, the field size bounds it
pub const MAX_BLOCK: usize = 255;

pub struct Rs8mCodec {
    nbsrc: usize,
    nbrpr: usize,
}

impl Rs8mCodec {
    pub fn new(nbsrc: usize, nbrpr: usize) -> Result<Rs8mCodec, Status> {
        if nbsrc == 0 || nbrpr == 0 || nbsrc + nbrpr > MAX_BLOCK {
            return Err(Status::BadOperation);
        }
        Ok(Rs8mCodec {
            nbsrc: nbsrc,
            nbrpr: nbrpr,
        })
    }
    pub fn nbsrc(&self) -> usize {
        self.nbsrc
    }
    pub fn nbrpr(&self) -> usize {
        self.nbrpr
    }

    // cauchy element for repair row j, source column i: 1 / (x_j + y_i)
    // with x_j = nbsrc + j and y_i = i, all distinct in GF(256)
    fn coef(&self, repair_row: usize, source_col: usize) -> u8 {
        gf256::inv(((self.nbsrc + repair_row) ^ source_col) as u8)
    }

    /// derive all repair symbols for one block of equal sized source symbols
    pub fn encode(&self, sources: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, Status> {
        if sources.len() != self.nbsrc {
            return Err(Status::BadOperation);
        }
        let symbol_len = sources[0].len();
        if sources.iter().any(|s| s.len() != symbol_len) {
            return Err(Status::BadOperation);
        }
        let mut repairs = vec![vec![0u8; symbol_len]; self.nbrpr];
        for (j, repair) in repairs.iter_mut().enumerate() {
            for (i, source) in sources.iter().enumerate() {
                gf256::mul_add_slice(repair, source, self.coef(j, i));
            }
        }
        Ok(repairs)
    }

    /// fill in missing source symbols.
    ///
    /// `sources[i]` is None for a lost symbol, `repairs[j]` likewise.  Needs
    /// at least `nbsrc` present symbols overall; returns NoData otherwise.
    pub fn decode(
        &self,
        sources: &mut Vec<Option<Vec<u8>>>,
        repairs: &[Option<Vec<u8>>],
    ) -> Result<(), Status> {
        if sources.len() != self.nbsrc || repairs.len() != self.nbrpr {
            return Err(Status::BadOperation);
        }
        let missing: Vec<usize> = (0..self.nbsrc).filter(|i| sources[*i].is_none()).collect();
        if missing.is_empty() {
            return Ok(());
        }
        let avail_repairs: Vec<usize> =
            (0..self.nbrpr).filter(|j| repairs[*j].is_some()).collect();
        if avail_repairs.len() < missing.len() {
            return Err(Status::NoData);
        }
        let symbol_len = match repairs[avail_repairs[0]] {
            Some(ref r) => r.len(),
            None => return Err(Status::BadOperation),
        };

        // each chosen repair row gives one equation over the missing symbols:
        //   sum_over_missing( coef * X ) = repair - sum_over_present( coef * src )
        let n = missing.len();
        let mut matrix = vec![vec![0u8; n]; n];
        let mut rhs = vec![vec![0u8; symbol_len]; n];
        for (row, j) in avail_repairs.iter().take(n).enumerate() {
            for (col, i) in missing.iter().enumerate() {
                matrix[row][col] = self.coef(*j, *i);
            }
            let repair = repairs[*j].as_ref().unwrap();
            if repair.len() != symbol_len {
                return Err(Status::BadOperation);
            }
            rhs[row].copy_from_slice(repair);
            for (i, source) in sources.iter().enumerate() {
                if let Some(source) = source {
                    if source.len() != symbol_len {
                        return Err(Status::BadOperation);
                    }
                    gf256::mul_add_slice(&mut rhs[row], source, self.coef(*j, i));
                }
            }
        }

        // gaussian elimination; the cauchy structure guarantees full rank
        for col in 0..n {
            let pivot = (col..n).find(|r| matrix[*r][col] != 0);
            let pivot = match pivot {
                Some(p) => p,
                None => return Err(Status::Unknown),
            };
            matrix.swap(col, pivot);
            rhs.swap(col, pivot);
            let p = matrix[col][col];
            for c in col..n {
                matrix[col][c] = gf256::div(matrix[col][c], p);
            }
            let scaled: Vec<u8> = rhs[col].iter().map(|v| gf256::div(*v, p)).collect();
            rhs[col] = scaled;
            for row in 0..n {
                if row == col || matrix[row][col] == 0 {
                    continue;
                }
                let factor = matrix[row][col];
                for c in col..n {
                    matrix[row][c] ^= gf256::mul(factor, matrix[col][c]);
                }
                let (a, b) = if row < col {
                    let (lo, hi) = rhs.split_at_mut(col);
                    (&mut lo[row], &hi[0])
                } else {
                    let (lo, hi) = rhs.split_at_mut(row);
                    (&mut hi[0], &lo[col])
                };
                gf256::mul_add_slice(a, b, factor);
            }
        }

        for (col, i) in missing.iter().enumerate() {
            sources[*i] = Some(std::mem::take(&mut rhs[col]));
        }
        Ok(())
    }
}
