//! forward error correction block codecs and the block machinery around
//! them.
//!
//! The sender groups source packets into blocks of `nbsrc` and derives
//! `nbrpr` repair packets per block.  The receiver puts blocks back
//! together and reconstructs whatever the network dropped, as long as at
//! least `nbsrc` packets of any kind made it through.
pub mod block_reader;
pub mod block_writer;
pub mod codec;
pub mod gf256;
pub mod ldpc;
pub mod rs8m;
