//! Block addressing: CID computation, verification and link extraction

use crate::DAG_CBOR_CID_CODEC;
use crate::error::{InterchangeError, Result};
use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;
use sha2::{Digest, Sha256};

/// SHA2-256 multihash code
pub const SHA2_256: u64 = 0x12;

/// Raw binary codec identifier for CIDs (0x55)
pub const RAW_CID_CODEC: u64 = 0x55;

/// Compute CID from raw bytes
///
/// Uses SHA-256 hash and DAG-CBOR codec. Assumes data is already DAG-CBOR encoded.
pub fn compute_cid(data: &[u8]) -> Result<IpldCid> {
    let hash = Sha256::digest(data);
    let mh = multihash::Multihash::<64>::wrap(SHA2_256, hash.as_slice())
        .map_err(InterchangeError::serialization)?;

    Ok(IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh))
}

/// Check that `data` hashes to the digest carried by `cid`
///
/// Only SHA2-256 multihashes can be verified; anything else is rejected
/// because it cannot be checked.
pub fn verify_block(cid: &IpldCid, data: &[u8]) -> Result<()> {
    let mh = cid.hash();
    if mh.code() != SHA2_256 {
        return Err(InterchangeError::malformed_msg(format!(
            "block {} uses unsupported multihash 0x{:x}",
            cid,
            mh.code()
        )));
    }

    let digest = Sha256::digest(data);
    if digest.as_slice() != mh.digest() {
        return Err(InterchangeError::malformed_msg(format!(
            "checksum mismatch for block {}",
            cid
        )));
    }

    Ok(())
}

/// Decode a DAG-CBOR block into a generic IPLD value
pub fn decode_ipld(data: &[u8]) -> Result<Ipld> {
    serde_ipld_dagcbor::from_slice(data).map_err(InterchangeError::serialization)
}

/// CIDs referenced by a block, in encoding order
///
/// Only DAG-CBOR blocks can carry links; other codecs are leaves.
pub fn links(cid: &IpldCid, data: &[u8]) -> Result<Vec<IpldCid>> {
    if cid.codec() != DAG_CBOR_CID_CODEC {
        return Ok(Vec::new());
    }

    let ipld = decode_ipld(data)?;
    let mut out = Vec::new();
    collect_links(&ipld, &mut out);
    Ok(out)
}

fn collect_links(ipld: &Ipld, out: &mut Vec<IpldCid>) {
    match ipld {
        Ipld::Link(cid) => out.push(*cid),
        Ipld::List(items) => {
            for item in items {
                collect_links(item, out);
            }
        }
        Ipld::Map(map) => {
            for value in map.values() {
                collect_links(value, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_compute_cid_is_deterministic() {
        let a = compute_cid(b"same bytes").unwrap();
        let b = compute_cid(b"same bytes").unwrap();
        let c = compute_cid(b"other bytes").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.codec(), DAG_CBOR_CID_CODEC);
        assert_eq!(a.hash().code(), SHA2_256);
    }

    #[test]
    fn test_verify_block_detects_tampering() {
        let cid = compute_cid(b"payload").unwrap();
        assert!(verify_block(&cid, b"payload").is_ok());

        let err = verify_block(&cid, b"tampered").unwrap_err();
        assert_eq!(
            err.kind(),
            &crate::error::InterchangeErrorKind::MalformedArchive
        );
    }

    #[test]
    fn test_links_in_nested_node() {
        let child1 = compute_cid(b"child1").unwrap();
        let child2 = compute_cid(b"child2").unwrap();

        let mut map = BTreeMap::new();
        map.insert(
            "chunks".to_string(),
            Ipld::List(vec![Ipld::Link(child1), Ipld::Link(child2)]),
        );
        map.insert("type".to_string(), Ipld::String("table".into()));
        let data = serde_ipld_dagcbor::to_vec(&Ipld::Map(map)).unwrap();
        let cid = compute_cid(&data).unwrap();

        assert_eq!(links(&cid, &data).unwrap(), vec![child1, child2]);
    }

    #[test]
    fn test_raw_blocks_have_no_links() {
        let mh = *compute_cid(b"raw").unwrap().hash();
        let raw = IpldCid::new_v1(RAW_CID_CODEC, mh);
        assert!(links(&raw, b"\xff\x00 not cbor").unwrap().is_empty());
    }
}
