pub mod common;

use common::MockResolver;
use dkim_engine::{
    crypto::VerifyingKey,
    header::{FieldBody, FieldName},
    signature::CanonicalizationAlgorithm,
    signer::Timestamp,
    verifier::{KeyLookupError, LookupTxt, PolicyError},
    Engine, EngineConfig, Message, Status, TxtKeyResolver, VerificationStatus, VerifierError,
};
use std::{
    future::Future,
    io::{self, ErrorKind},
    pin::Pin,
    time::{Duration, SystemTime},
};

async fn sign_message(
    engine: &Engine,
    key_file: &str,
    message: &Message,
    canon: (CanonicalizationAlgorithm, CanonicalizationAlgorithm),
) -> (Message, VerifyingKey) {
    let (signing_key, verifying_key) = common::read_key_pair(key_file).await;

    let mut request = common::make_request("example.com", "sel1", signing_key);
    request.canonicalization = canon.into();

    let result = engine.sign(request, message).unwrap();

    (common::attach_signature(message, &result), verifying_key)
}

#[tokio::test]
async fn round_trip_all_canonicalizations() {
    use CanonicalizationAlgorithm::*;

    let _ = tracing_subscriber::fmt::try_init();

    let engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    for key_file in ["tests/keys/rsa2048.pem", "tests/keys/ed25519.pem"] {
        for canon in [(Simple, Simple), (Simple, Relaxed), (Relaxed, Simple), (Relaxed, Relaxed)] {
            let (signed, key) = sign_message(&engine, key_file, &message, canon).await;
            let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))]);

            let report = engine.verify(&signed, &resolver).await.unwrap();

            assert_eq!(report.status(), VerificationStatus::Valid, "{key_file} {canon:?}");
            assert_eq!(report.results().len(), 1);
            assert_eq!(report.results()[0].error, None);
        }
    }
}

#[tokio::test]
async fn relaxed_tolerates_whitespace_changes() {
    use CanonicalizationAlgorithm::*;

    let engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    let (signed, key) =
        sign_message(&engine, "tests/keys/ed25519.pem", &message, (Relaxed, Relaxed)).await;
    let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))]);

    let mut body = signed.body().to_vec();
    body.extend_from_slice(b"\r\n\r\n");
    let reformatted = Message::new(signed.headers().to_vec(), body);

    let report = engine.verify(&reformatted, &resolver).await.unwrap();

    assert_eq!(report.status(), VerificationStatus::Valid);
}

#[tokio::test]
async fn tampered_message_is_bad_signature() {
    use CanonicalizationAlgorithm::*;

    let engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    let (signed, key) =
        sign_message(&engine, "tests/keys/rsa2048.pem", &message, (Relaxed, Simple)).await;
    let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))]);

    // modified header
    let mut headers = signed.headers().to_vec();
    let subject = headers.iter_mut().find(|(name, _)| *name == "Subject").unwrap();
    subject.1 = FieldBody::new(*b" Greetings from the mountains").unwrap();
    let tampered = Message::new(headers, signed.body().to_vec());

    let report = engine.verify(&tampered, &resolver).await.unwrap();

    assert_eq!(report.status(), VerificationStatus::BadSignature);
    assert!(matches!(
        report.results()[0].error,
        Some(VerifierError::VerificationFailure(_))
    ));

    // modified body
    let tampered = Message::new(signed.headers().to_vec(), b"Hello Eve,\r\n".to_vec());

    let report = engine.verify(&tampered, &resolver).await.unwrap();

    assert_eq!(report.status(), VerificationStatus::BadSignature);
    assert_eq!(report.results()[0].error, Some(VerifierError::BodyHashMismatch));
}

#[tokio::test]
async fn unsigned_message_is_no_signature() {
    let engine = Engine::init(EngineConfig::default()).unwrap();

    let report = engine
        .verify(&common::make_message(), &MockResolver::default())
        .await
        .unwrap();

    assert_eq!(report.status(), VerificationStatus::NoSignature);
    assert_eq!(Status::from(report.status()), Status::NoSignature);
    assert!(report.results().is_empty());

    let report = engine
        .verify(&Message::default(), &MockResolver::default())
        .await
        .unwrap();

    assert_eq!(report.status(), VerificationStatus::NoSignature);
}

#[tokio::test]
async fn key_lookup_failures() {
    use CanonicalizationAlgorithm::*;

    let engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    let (signed, _) =
        sign_message(&engine, "tests/keys/ed25519.pem", &message, (Simple, Simple)).await;

    let cases = [
        (MockResolver::default(), VerificationStatus::KeyNotFound),
        (
            MockResolver::new([(("example.com", "sel1"), Err(KeyLookupError::Revoked))]),
            VerificationStatus::KeyRevoked,
        ),
        (
            MockResolver::new([(("example.com", "sel1"), Err(KeyLookupError::TemporaryFailure))]),
            VerificationStatus::TemporaryFailure,
        ),
        (
            MockResolver::new([(("example.com", "sel1"), Err(KeyLookupError::InvalidRecord))]),
            VerificationStatus::CantVerify,
        ),
    ];

    for (resolver, expected) in cases {
        let report = engine.verify(&signed, &resolver).await.unwrap();
        assert_eq!(report.status(), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn key_lookup_timeout() {
    use CanonicalizationAlgorithm::*;

    let config = EngineConfig {
        lookup_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let engine = Engine::init(config).unwrap();
    let message = common::make_message();

    let (signed, key) =
        sign_message(&engine, "tests/keys/ed25519.pem", &message, (Simple, Simple)).await;
    let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))])
        .with_delay(Duration::from_secs(60));

    let report = engine.verify(&signed, &resolver).await.unwrap();

    assert_eq!(report.status(), VerificationStatus::TemporaryFailure);
    assert!(report.is_temporary());
    assert_eq!(report.results()[0].error, Some(VerifierError::KeyLookupTimeout));
    assert_eq!(Status::from(report.status()).code(), 14);
}

#[tokio::test]
async fn key_too_small() {
    use CanonicalizationAlgorithm::*;

    let config = EngineConfig {
        min_key_bits: 2048,
        ..Default::default()
    };
    let engine = Engine::init(config).unwrap();
    let message = common::make_message();

    let (signed, key) =
        sign_message(&engine, "tests/keys/rsa1024_pkcs1.pem", &message, (Simple, Simple)).await;
    let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))]);

    let report = engine.verify(&signed, &resolver).await.unwrap();

    assert_eq!(report.status(), VerificationStatus::CantVerify);
    assert_eq!(
        report.results()[0].error,
        Some(VerifierError::Policy(PolicyError::KeyTooSmall))
    );
}

#[tokio::test]
async fn expired_signature() {
    let signing_engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    let (signing_key, key) = common::read_key_pair("tests/keys/ed25519.pem").await;
    let mut request = common::make_request("example.com", "sel1", signing_key);
    request.timestamp = Some(Timestamp::Exact(1_700_000_000));
    request.valid_duration = Some(Duration::from_secs(600));
    let result = signing_engine.sign(request, &message).unwrap();
    let signed = common::attach_signature(&message, &result);

    let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))]);

    let config = EngineConfig {
        fixed_system_time: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_300)),
        ..Default::default()
    };
    let engine = Engine::init(config).unwrap();
    let report = engine.verify(&signed, &resolver).await.unwrap();
    assert_eq!(report.status(), VerificationStatus::Valid);

    let config = EngineConfig {
        fixed_system_time: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_001_000)),
        ..Default::default()
    };
    let engine = Engine::init(config).unwrap();
    let report = engine.verify(&signed, &resolver).await.unwrap();
    assert_eq!(report.status(), VerificationStatus::BadSignature);
    assert_eq!(
        report.results()[0].error,
        Some(VerifierError::Policy(PolicyError::SignatureExpired))
    );

    // a revoked key takes precedence over the expiration
    let resolver = MockResolver::new([(("example.com", "sel1"), Err(KeyLookupError::Revoked))]);
    let report = engine.verify(&signed, &resolver).await.unwrap();
    assert_eq!(report.status(), VerificationStatus::KeyRevoked);
}

#[tokio::test]
async fn malformed_signature_and_valid_signature() {
    use CanonicalizationAlgorithm::*;

    let engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    let (mut signed, key) =
        sign_message(&engine, "tests/keys/ed25519.pem", &message, (Relaxed, Relaxed)).await;
    let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))]);

    signed.prepend_header((
        FieldName::new("DKIM-Signature").unwrap(),
        FieldBody::new(*b" v=1; a=rsa-sha256; d=example.com").unwrap(),
    ));

    let report = engine.verify(&signed, &resolver).await.unwrap();

    assert_eq!(report.status(), VerificationStatus::Valid);
    assert_eq!(report.results().len(), 2);
    assert_eq!(report.results()[0].status, VerificationStatus::SyntaxError);
    assert_eq!(report.results()[0].index, 0);
    assert_eq!(report.results()[1].status, VerificationStatus::Valid);
    assert_eq!(report.results()[1].index, 1);
}

#[derive(Clone)]
struct MockLookupTxt {
    record: String,
}

impl LookupTxt for MockLookupTxt {
    type Answer = Vec<io::Result<Vec<u8>>>;
    type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;

    fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
        let domain = domain.to_owned();

        Box::pin(async move {
            match domain.as_str() {
                "sel1._domainkey.example.com." => Ok(vec![Ok(self.record.as_bytes().to_vec())]),
                _ => Err(ErrorKind::NotFound.into()),
            }
        })
    }
}

#[tokio::test]
async fn verify_with_txt_records() {
    use CanonicalizationAlgorithm::*;

    let engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    let (signed, _) =
        sign_message(&engine, "tests/keys/rsa2048.pem", &message, (Relaxed, Simple)).await;

    let key_data = common::read_public_key_file_base64("tests/keys/rsa2048pub.pem").await.unwrap();
    let record = format!("v=DKIM1; k=rsa; p={key_data}");

    let resolver = TxtKeyResolver::new(MockLookupTxt { record });
    let report = engine.verify(&signed, &resolver).await.unwrap();
    assert_eq!(report.status(), VerificationStatus::Valid);

    let resolver = TxtKeyResolver::new(MockLookupTxt { record: "v=DKIM1; k=rsa; p=".into() });
    let report = engine.verify(&signed, &resolver).await.unwrap();
    assert_eq!(report.status(), VerificationStatus::KeyRevoked);

    // Ed25519 public key for an RSA signature
    let resolver = TxtKeyResolver::new(MockLookupTxt {
        record: "v=DKIM1; k=ed25519; p=MCowBQYDK2VwAyEA9VXMCgG0fXGIzwV7eOxKhz+Pe6DRmOBYjyvVoVrc/Dw="
            .into(),
    });
    let report = engine.verify(&signed, &resolver).await.unwrap();
    assert_eq!(report.status(), VerificationStatus::CantVerify);
    assert_eq!(report.results()[0].error, Some(VerifierError::WrongKeyType));
}

#[tokio::test]
async fn verification_is_repeatable() {
    use CanonicalizationAlgorithm::*;

    let engine = Engine::init(EngineConfig::default()).unwrap();
    let message = common::make_message();

    let (signed, key) =
        sign_message(&engine, "tests/keys/rsa2048.pem", &message, (Simple, Relaxed)).await;
    let resolver = MockResolver::new([(("example.com", "sel1"), Ok(key))]);

    let first = engine.verify(&signed, &resolver).await.unwrap();
    let second = engine.verify(&signed, &resolver).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.status(), VerificationStatus::Valid);
}
