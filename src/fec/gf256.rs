//! arithmetic in GF(2^8) with polynomial 0x11D.
//!
//! Multiplication goes through log/exp tables built once on first use.
//! Addition is xor, which is why erasure codes love this field.
use std::sync::OnceLock;

const FIELD: usize = 256;
const POLY: u16 = 0x11D;

struct Tables {
    log: [u8; FIELD],
    exp: [u8; FIELD * 2],
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut log = [0u8; FIELD];
        let mut exp = [0u8; FIELD * 2];
        let mut x: u16 = 1;
        for i in 0..FIELD - 1 {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= POLY;
            }
        }
        // doubled exp table saves a modulo in mul
        for i in 0..FIELD - 1 {
            exp[i + FIELD - 1] = exp[i];
        }
        Tables { log: log, exp: exp }
    })
}

pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    t.exp[t.log[a as usize] as usize + t.log[b as usize] as usize]
}

pub fn inv(a: u8) -> u8 {
    assert!(a != 0, "gf256: inverse of zero");
    let t = tables();
    t.exp[255 - t.log[a as usize] as usize]
}

pub fn div(a: u8, b: u8) -> u8 {
    mul(a, inv(b))
}

/// acc ^= coef * data, the inner loop of every codec here
pub fn mul_add_slice(acc: &mut [u8], data: &[u8], coef: u8) -> () {
    if coef == 0 {
        return;
    }
    for (a, d) in acc.iter_mut().zip(data.iter()) {
        *a ^= mul(coef, *d);
    }
}
