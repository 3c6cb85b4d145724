//! The decode pipeline: turn an armored credential string plus the
//! caller's peer identity back into validated metadata and payload (§4.7).
//!
//! Steps 6-7 implement the padding-oracle discipline described in the
//! design notes (Vaudenay): a CBC unpadding failure is recorded as a flag
//! on [`crate::crypto::cipher::Decrypted`] rather than returned early, so
//! the MAC comparison below always runs and always takes the same code
//! path regardless of whether the ciphertext was tampered with.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::authentication::PeerIdentity;
use crate::cred::{self, Inner, Outer};
use crate::crypto::{self, cipher, mac, zip, CipherType};
use crate::encode::derive_dek;
use crate::error::{Error, ErrorKind};
use crate::replay::{Fingerprint, InsertOutcome, ReplayStore};
use crate::subkey::Subkeys;
use crate::wire::response::DecodeMetadata;
use anomaly::format_err;

/// Everything the decode pipeline needs that outlives a single request.
pub struct DecodeContext<'a> {
    pub subkeys: &'a Subkeys,
    pub prng: &'a crypto::Prng,
    pub replay: &'a ReplayStore,
    pub gids: &'a crate::gids::GroupCache,
    pub max_ttl: u32,
    pub allow_clock_skew: bool,
    pub allow_root_decode: bool,
    pub max_retries: u8,
}

/// Outcome of a decode attempt: metadata is populated even for the three
/// "soft" failures (expired/rewound/replayed) so callers can display it.
pub struct DecodeOutcome {
    pub metadata: DecodeMetadata,
    pub fingerprint: Option<Fingerprint>,
}

/// Run the full decode pipeline.
///
/// On success or on a soft failure (`CredExpired`/`CredRewound`/
/// `CredReplayed`), returns `Ok`/`Err` respectively but always populates
/// [`DecodeOutcome::metadata`] via the `Err` variant's companion data; hard
/// failures return a bare `Err` with no usable metadata.
pub fn decode(
    ctx: &DecodeContext,
    peer: PeerIdentity,
    armored: &str,
    retry: u8,
) -> Result<DecodeOutcome, (Error, Option<DecodeOutcome>)> {
    // Step 2: retry log / abuse check.
    if retry > ctx.max_retries {
        return Err((Error::from(ErrorKind::Socket), None));
    }

    // Step 3: timestamp.
    let decode_time = now_secs().map_err(|e| (e, None))?;

    // Step 4: unarmor.
    let raw = crypto::base64_decode(armored.trim()).map_err(|e| (e, None))?;

    // Step 5: unpack outer, then apply §3's cross-field invariants.
    let (outer, consumed) = Outer::unpack(&raw).map_err(|e| (e, None))?;
    if outer.mac_type.size() < outer.cipher_type.key_size() {
        return Err((Error::from(ErrorKind::BadMac), None));
    }
    let mac_size = outer.mac_type.size();
    if raw.len() < consumed + mac_size {
        return Err((Error::from(ErrorKind::BadCred), None));
    }
    let tag = raw[consumed..consumed + mac_size].to_vec();
    let inner_wire = &raw[consumed + mac_size..];

    // Step 6: decrypt, deferring any padding failure past the MAC check.
    let (inner_bytes, padding_ok) = if outer.cipher_type != CipherType::None {
        let dek = match derive_dek(ctx.subkeys, outer.mac_type, outer.cipher_type, &tag) {
            Ok(dek) => dek,
            Err(e) => return Err((e, None)),
        };
        match cipher::decrypt(outer.cipher_type, &dek, &outer.iv, inner_wire) {
            Ok(cipher::Decrypted { data, padding_ok }) => (data, padding_ok),
            Err(e) => return Err((e, None)),
        }
    } else {
        (inner_wire.to_vec(), true)
    };

    // Step 7: MAC verify in constant time. A padding failure from step 6
    // is folded into the same CRED_INVALID outcome as a MAC mismatch.
    let outer_bytes = &raw[..consumed];
    let mut mac_input = Vec::with_capacity(outer_bytes.len() + inner_bytes.len());
    mac_input.extend_from_slice(outer_bytes);
    mac_input.extend_from_slice(&inner_bytes);
    let expected_tag = mac::compute(outer.mac_type, ctx.subkeys.mac(), &mac_input).map_err(|e| (e, None))?;
    let mac_matches = crypto::consttime_equal(&expected_tag, &tag);

    if !mac_matches || !padding_ok {
        return Err((Error::from(ErrorKind::CredInvalid), None));
    }

    // Step 8: decompress.
    let plaintext = zip::decompress(outer.zip_type, &inner_bytes).map_err(|e| (e, None))?;

    // Step 9: unpack inner; mix the salt back into the entropy pool if encrypted.
    let inner = Inner::unpack(&plaintext).map_err(|e| (e, None))?;
    if outer.cipher_type != CipherType::None {
        ctx.prng.reseed_with(&inner.salt);
    }

    let metadata = build_metadata(&outer, &inner, decode_time);

    // Step 10: authorize.
    if let Err(e) = authorize(&inner, peer, ctx.allow_root_decode, ctx.gids) {
        return Err((e, Some(DecodeOutcome { metadata, fingerprint: None })));
    }

    // Step 11: freshness.
    let ttl = inner.ttl.min(ctx.max_ttl);
    let skew = if ctx.allow_clock_skew { ttl } else { 1 };
    if decode_time < inner.encode_time.saturating_sub(skew) {
        return Err((Error::from(ErrorKind::CredRewound), Some(DecodeOutcome { metadata, fingerprint: None })));
    }
    if decode_time > inner.encode_time.saturating_add(ttl) {
        return Err((Error::from(ErrorKind::CredExpired), Some(DecodeOutcome { metadata, fingerprint: None })));
    }

    // Step 12: replay check.
    let expiry = inner.encode_time.saturating_add(ttl);
    let fingerprint = Fingerprint::from_tag(&tag, expiry);
    match ctx.replay.insert(fingerprint.clone(), retry) {
        InsertOutcome::Fresh => {}
        InsertOutcome::Duplicate => {
            return Err((
                Error::from(ErrorKind::CredReplayed),
                Some(DecodeOutcome { metadata, fingerprint: None }),
            ));
        }
    }

    Ok(DecodeOutcome {
        metadata,
        fingerprint: Some(fingerprint),
    })
}

fn build_metadata(outer: &Outer, inner: &Inner, decode_time: u32) -> DecodeMetadata {
    DecodeMetadata {
        cred_uid: inner.cred_uid,
        cred_gid: inner.cred_gid,
        encode_time: inner.encode_time,
        decode_time,
        ttl: inner.ttl,
        cipher_type: outer.cipher_type.to_u8(),
        mac_type: outer.mac_type.to_u8(),
        zip_type: outer.zip_type.to_u8(),
        realm: outer.realm.clone(),
        auth_uid: inner.auth_uid,
        auth_gid: inner.auth_gid,
        addr: inner.addr.clone(),
        data: inner.data.clone(),
    }
}

/// Step 10: `auth_uid`/`auth_gid` restriction check (§4.7).
fn authorize(inner: &Inner, peer: PeerIdentity, allow_root_decode: bool, gids: &crate::gids::GroupCache) -> Result<(), Error> {
    if inner.auth_uid != cred::UID_ANY
        && inner.auth_uid != peer.uid
        && !(allow_root_decode && peer.uid == 0)
    {
        return Err(format_err!(ErrorKind::CredUnauthorized, "uid restriction not satisfied").into());
    }
    if inner.auth_gid != cred::GID_ANY
        && inner.auth_gid != peer.gid
        && !gids.is_member(peer.uid, inner.auth_gid)
    {
        return Err(format_err!(ErrorKind::CredUnauthorized, "gid restriction not satisfied").into());
    }
    Ok(())
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
    use crate::encode::{self, EncodeContext};
    use crate::wire::{Choice, EncodeRequest};
    use std::os::unix::fs::PermissionsExt;

    fn test_subkeys() -> Subkeys {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, vec![0x7bu8; 1024]).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        Subkeys::derive(&path).unwrap()
    }

    fn roundtrip(cipher: CipherType, mac_type: MacType, zip_type: ZipType, data: &[u8]) -> (String, Subkeys) {
        let subkeys = test_subkeys();
        let enc_ctx = EncodeContext {
            subkeys: &subkeys,
            default_cipher: cipher,
            default_mac: mac_type,
            default_zip: zip_type,
            default_ttl: 300,
            max_ttl: 3600,
            origin_addr: Some([127, 0, 0, 1]),
        };
        let peer = PeerIdentity { uid: 1000, gid: 1000 };
        let request = EncodeRequest {
            cipher_type: Choice::Default,
            mac_type: Choice::Default,
            zip_type: Choice::Default,
            realm: vec![],
            ttl: Choice::Default,
            auth_uid: cred::UID_ANY,
            auth_gid: cred::GID_ANY,
            data: data.to_vec(),
        };
        let armored = encode::encode(&enc_ctx, peer, &request, 0).unwrap();
        (armored, subkeys)
    }

    #[test]
    fn decode_recovers_uid_gid_and_payload() {
        let (armored, subkeys) = roundtrip(CipherType::Aes128, MacType::Sha256, ZipType::None, b"payload");
        let prng = crypto::Prng::new(None);
        let replay = ReplayStore::new();
        let gids = crate::gids::GroupCache::new(false);
        let dec_ctx = DecodeContext {
            subkeys: &subkeys,
            prng: &prng,
            replay: &replay,
            gids: &gids,
            max_ttl: 3600,
            allow_clock_skew: false,
            allow_root_decode: true,
            max_retries: 2,
        };

        let peer = PeerIdentity { uid: 1000, gid: 1000 };
        let outcome = decode(&dec_ctx, peer, &armored, 0).unwrap();
        assert_eq!(outcome.metadata.cred_uid, 1000);
        assert_eq!(outcome.metadata.data, b"payload");
    }

    #[test]
    fn bit_flip_anywhere_yields_cred_invalid() {
        let (armored, subkeys) = roundtrip(CipherType::Aes128, MacType::Sha256, ZipType::None, b"payload");
        let body_start = armored.find(':').unwrap() + 1;
        let body_end = armored.rfind(':').unwrap();
        let mut chars: Vec<char> = armored.chars().collect();
        let flip_at = body_start + (body_end - body_start) / 2;
        chars[flip_at] = if chars[flip_at] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();

        let prng = crypto::Prng::new(None);
        let replay = ReplayStore::new();
        let gids = crate::gids::GroupCache::new(false);
        let dec_ctx = DecodeContext {
            subkeys: &subkeys,
            prng: &prng,
            replay: &replay,
            gids: &gids,
            max_ttl: 3600,
            allow_clock_skew: false,
            allow_root_decode: true,
            max_retries: 2,
        };

        let peer = PeerIdentity { uid: 1000, gid: 1000 };
        let result = decode(&dec_ctx, peer, &tampered, 0);
        assert!(result.is_err());
    }

    #[test]
    fn replayed_credential_is_rejected_on_second_decode() {
        let (armored, subkeys) = roundtrip(CipherType::None, MacType::Sha256, ZipType::None, b"x");
        let prng = crypto::Prng::new(None);
        let replay = ReplayStore::new();
        let gids = crate::gids::GroupCache::new(false);
        let dec_ctx = DecodeContext {
            subkeys: &subkeys,
            prng: &prng,
            replay: &replay,
            gids: &gids,
            max_ttl: 3600,
            allow_clock_skew: false,
            allow_root_decode: true,
            max_retries: 2,
        };
        let peer = PeerIdentity { uid: 1000, gid: 1000 };

        assert!(decode(&dec_ctx, peer, &armored, 0).is_ok());
        let second = decode(&dec_ctx, peer, &armored, 0);
        assert!(matches!(second, Err((ref e, _)) if *e.kind() == ErrorKind::CredReplayed));
    }

    #[test]
    fn unauthorized_uid_is_rejected() {
        let subkeys = test_subkeys();
        let enc_ctx = EncodeContext {
            subkeys: &subkeys,
            default_cipher: CipherType::None,
            default_mac: MacType::Sha256,
            default_zip: ZipType::None,
            default_ttl: 300,
            max_ttl: 3600,
            origin_addr: None,
        };
        let owner = PeerIdentity { uid: 1000, gid: 1000 };
        let request = EncodeRequest {
            auth_uid: 2000, // restricted to a different uid
            ..EncodeRequest::default()
        };
        let armored = encode::encode(&enc_ctx, owner, &request, 0).unwrap();

        let prng = crypto::Prng::new(None);
        let replay = ReplayStore::new();
        let gids = crate::gids::GroupCache::new(false);
        let dec_ctx = DecodeContext {
            subkeys: &subkeys,
            prng: &prng,
            replay: &replay,
            gids: &gids,
            max_ttl: 3600,
            allow_clock_skew: false,
            allow_root_decode: false,
            max_retries: 2,
        };

        let other = PeerIdentity { uid: 1000, gid: 1000 };
        let result = decode(&dec_ctx, other, &armored, 0);
        assert!(matches!(result, Err((ref e, _)) if *e.kind() == ErrorKind::CredUnauthorized));
    }
}
