//! The encode pipeline: turn an [`EncodeRequest`] plus the caller's peer
//! identity into an armored credential string (§4.6).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::authentication::PeerIdentity;
use crate::cred::{check_invariants, Inner, Outer, SALT_LEN, VERSION};
use crate::crypto::{self, mac, zip, CipherType};
use crate::error::{Error, ErrorKind};
use crate::subkey::Subkeys;
use crate::wire::EncodeRequest;
use anomaly::format_err;

/// Everything the encode pipeline needs that outlives a single request.
pub struct EncodeContext<'a> {
    pub subkeys: &'a Subkeys,
    pub default_cipher: CipherType,
    pub default_mac: mac::MacType,
    pub default_zip: zip::ZipType,
    pub default_ttl: u32,
    pub max_ttl: u32,
    pub origin_addr: Option<[u8; 4]>,
}

/// Run the full encode pipeline, returning the armored credential string.
pub fn encode(ctx: &EncodeContext, peer: PeerIdentity, request: &EncodeRequest, retry: u8) -> Result<String, Error> {
    // Step 3: retry check, symmetric with the decode path's (§4.6 step 3).
    if retry > crate::replay::MAX_RETRIES {
        return Err(Error::from(ErrorKind::Socket));
    }

    // Step 1: resolve DEFAULT sentinels against the daemon's configuration.
    let cipher_type = request.cipher_type.resolve(ctx.default_cipher);
    let mac_type = request.mac_type.resolve(ctx.default_mac);
    let mut zip_type = request.zip_type.resolve(ctx.default_zip);
    let ttl = request.ttl.resolve(ctx.default_ttl).min(ctx.max_ttl);

    if request.data.len() > crate::config::MAX_MESSAGE_LEN {
        return Err(Error::from(ErrorKind::BadLength));
    }
    if request.data.is_empty() {
        zip_type = zip::ZipType::None;
    }

    // Step 2: peer identity supplies cred_uid/cred_gid.
    let cred_uid = peer.uid;
    let cred_gid = peer.gid;

    // Step 4: timestamp.
    let encode_time = now_secs()?;

    // Step 5: draw salt and, if enciphering, an IV.
    let mut salt = [0u8; SALT_LEN];
    crypto::pseudo_bytes(&mut salt);
    let iv = if cipher_type != CipherType::None {
        let mut iv = vec![0u8; cipher_type.iv_size()];
        crypto::pseudo_bytes(&mut iv);
        iv
    } else {
        Vec::new()
    };

    let addr = ctx.origin_addr.map(|a| a.to_vec()).unwrap_or_default();

    let mut outer = Outer {
        version: VERSION,
        cipher_type,
        mac_type,
        zip_type,
        realm: request.realm.clone(),
        iv,
    };
    check_invariants(&outer, request.data.len())?;

    let inner = Inner {
        salt,
        addr,
        encode_time,
        ttl,
        cred_uid,
        cred_gid,
        auth_uid: request.auth_uid,
        auth_gid: request.auth_gid,
        data: request.data.clone(),
    };

    // Step 7: pack inner.
    let mut inner_bytes = inner.pack();

    // Step 8: compress, disabling it if compression didn't shrink the data.
    if outer.zip_type != zip::ZipType::None {
        match zip::compress(outer.zip_type, &inner_bytes)? {
            Some(compressed) => inner_bytes = compressed,
            None => outer.zip_type = zip::ZipType::None,
        }
    }

    // Step 6: pack outer, after the shrink check may have reverted zip_type.
    let outer_bytes = outer.pack();

    // Step 9: MAC over outer || inner-plaintext-or-compressed (pre-encryption).
    let mut mac_input = Vec::with_capacity(outer_bytes.len() + inner_bytes.len());
    mac_input.extend_from_slice(&outer_bytes);
    mac_input.extend_from_slice(&inner_bytes);
    let tag = mac::compute(outer.mac_type, ctx.subkeys.mac(), &mac_input)?;

    // Step 10: encrypt, deriving the DEK from HMAC(dek_subkey; tag).
    let inner_final = if outer.cipher_type != CipherType::None {
        let dek = derive_dek(ctx.subkeys, outer.mac_type, outer.cipher_type, &tag)?;
        crypto::cipher::encrypt(outer.cipher_type, &dek, &outer.iv, &inner_bytes)?
    } else {
        inner_bytes
    };

    // Step 11: armor outer || tag || inner-ciphertext.
    let mut armored_input = Vec::with_capacity(outer_bytes.len() + tag.len() + inner_final.len());
    armored_input.extend_from_slice(&outer_bytes);
    armored_input.extend_from_slice(&tag);
    armored_input.extend_from_slice(&inner_final);

    Ok(crypto::base64_encode(&armored_input))
}

/// `DEK = HMAC_{mac_type}(dek_subkey; tag)` truncated to the cipher's key
/// size (§4.6 step 10). Uses the credential's own MAC algorithm, matching
/// the original daemon's `mac_block(m->mac, conf->dek_key, ..., c->mac)`.
pub(crate) fn derive_dek(
    subkeys: &Subkeys,
    mac_type: mac::MacType,
    cipher: CipherType,
    tag: &[u8],
) -> Result<Vec<u8>, Error> {
    let full = mac::compute(mac_type, subkeys.dek(), tag)?;
    let key_size = cipher.key_size();
    if full.len() < key_size {
        return Err(format_err!(ErrorKind::Snafu, "DEK subkey digest shorter than cipher key").into());
    }
    Ok(full[..key_size].to_vec())
}

fn now_secs() -> Result<u32, Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format_err!(ErrorKind::Snafu, "system clock before epoch: {}", e))?;
    Ok(now.as_secs() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::mac::MacType;
    use crate::crypto::zip::ZipType;
    use crate::wire::Choice;

    fn test_context(subkeys: &Subkeys) -> EncodeContext<'_> {
        EncodeContext {
            subkeys,
            default_cipher: CipherType::Aes128,
            default_mac: MacType::Sha256,
            default_zip: ZipType::None,
            default_ttl: 300,
            max_ttl: 3600,
            origin_addr: Some([127, 0, 0, 1]),
        }
    }

    #[test]
    fn encode_produces_armored_string() {
        use std::os::unix::fs::PermissionsExt;

        let subkeys = {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("key");
            std::fs::write(&path, vec![0x5au8; 1024]).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
            Subkeys::derive(&path).unwrap()
        };
        let ctx = test_context(&subkeys);

        let peer = PeerIdentity { uid: 1000, gid: 1000 };
        let request = EncodeRequest {
            cipher_type: Choice::Default,
            mac_type: Choice::Default,
            zip_type: Choice::Default,
            realm: vec![],
            ttl: Choice::Default,
            auth_uid: crate::cred::UID_ANY,
            auth_gid: crate::cred::GID_ANY,
            data: b"hello".to_vec(),
        };

        let armored = encode(&ctx, peer, &request, 0).unwrap();
        assert!(armored.starts_with("MUNGE:"));
    }

    #[test]
    fn retry_past_the_limit_fails_socket() {
        use std::os::unix::fs::PermissionsExt;

        let subkeys = {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("key");
            std::fs::write(&path, vec![0x5bu8; 1024]).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
            Subkeys::derive(&path).unwrap()
        };
        let ctx = test_context(&subkeys);
        let peer = PeerIdentity { uid: 1000, gid: 1000 };
        let result = encode(&ctx, peer, &EncodeRequest::default(), crate::replay::MAX_RETRIES + 1);
        assert!(matches!(result, Err(ref e) if *e.kind() == ErrorKind::Socket));
    }
}
