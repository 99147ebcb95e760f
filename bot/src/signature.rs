use hyper::HeaderMap;
use openssl::{
    hash::MessageDigest,
    memcmp,
    pkey::{PKey, Private},
    sign::Signer,
};
use pong_core::message::Rejection;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Checks that requests were signed by Slack with the app's signing secret.
///
/// A signature has the form `v0=<hex>`, where `<hex>` is the HMAC-SHA256 of
/// `v0:<timestamp>:<body>` keyed with the signing secret.
pub struct Verifier {
    key: PKey<Private>,
}

impl Verifier {
    pub fn new(signing_secret: &str) -> anyhow::Result<Self> {
        Ok(Self {
            key: PKey::hmac(signing_secret.as_bytes())?,
        })
    }

    pub fn sign(&self, version: &str, timestamp: &str, body: &[u8]) -> anyhow::Result<String> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(format!("{version}:{timestamp}:").as_bytes())?;
        signer.update(body)?;
        Ok(format!("{version}={}", hex::encode(signer.sign_to_vec()?)))
    }

    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> anyhow::Result<()> {
        let signature = header(headers, SIGNATURE_HEADER)?;
        let timestamp = header(headers, TIMESTAMP_HEADER)?;
        let (version, _) = signature
            .split_once('=')
            .ok_or_else(|| Rejection::unauthorized("malformed signature"))?;

        let expected = self.sign(version, timestamp, body)?;
        if expected.len() != signature.len()
            || !memcmp::eq(expected.as_bytes(), signature.as_bytes())
        {
            return Err(Rejection::unauthorized("signature mismatch").into());
        }
        Ok(())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Rejection> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Rejection::unauthorized(format!("missing header {name}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use hyper::header::HeaderValue;

    const SECRET: &str = "000000000000000000000000000000000000000000000000000000000000000000";
    const BODY: &[u8] =
        b"token=123&team_id=456&team_domain=abc&channel_id=789&channel_name=ch_name&user_id=ABC";
    const SIGNATURE: &str = "v0=1a2eeb0ac2a8a562cc98047a50bef95639047e7d2aeb54cb5a88a40617dedb57";

    fn headers(signature: &'static str, timestamp: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static(signature));
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static(timestamp));
        headers
    }

    fn rejection(err: anyhow::Error) -> Rejection {
        err.downcast().unwrap()
    }

    #[test]
    fn test_sign() {
        let verifier = Verifier::new(SECRET).unwrap();
        assert_eq!(verifier.sign("v0", "1571051763", BODY).unwrap(), SIGNATURE);
    }

    #[test]
    fn test_verify() {
        let verifier = Verifier::new(SECRET).unwrap();
        verifier
            .verify(&headers(SIGNATURE, "1571051763"), BODY)
            .unwrap();
    }

    #[test]
    fn test_verify_tampered() {
        let verifier = Verifier::new(SECRET).unwrap();
        let err = verifier
            .verify(&headers(SIGNATURE, "1571051764"), BODY)
            .unwrap_err();
        assert_eq!(rejection(err), Rejection::unauthorized("signature mismatch"));

        let err = verifier
            .verify(&headers("v0=abc", "1571051763"), BODY)
            .unwrap_err();
        assert_eq!(rejection(err), Rejection::unauthorized("signature mismatch"));
    }

    #[test]
    fn test_verify_missing_headers() {
        let verifier = Verifier::new(SECRET).unwrap();
        let err = verifier.verify(&HeaderMap::new(), BODY).unwrap_err();
        assert_eq!(
            rejection(err),
            Rejection::unauthorized("missing header x-slack-signature")
        );
    }
}
