use dkim_engine::{
    crypto::{SigningKey, VerifyingKey},
    signature::{DomainName, Selector},
    verifier::{KeyLookupError, KeyResolver},
    Message, SignRequest, SignatureAlgorithm, SigningResult,
};
use std::{collections::HashMap, future::Future, io, pin::Pin, sync::Arc, time::Duration};
use tokio::{fs, time};

type KeyResult = Result<VerifyingKey, KeyLookupError>;

/// A resolver serving keys from memory, optionally after a delay.
#[derive(Clone, Default)]
pub struct MockResolver {
    keys: Arc<HashMap<(String, String), KeyResult>>,
    delay: Option<Duration>,
}

impl MockResolver {
    pub fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = ((&'static str, &'static str), KeyResult)>,
    {
        let keys = keys
            .into_iter()
            .map(|((d, s), k)| ((d.to_owned(), s.to_owned()), k))
            .collect();
        Self {
            keys: Arc::new(keys),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl KeyResolver for MockResolver {
    type Query<'a> = Pin<Box<dyn Future<Output = KeyResult> + Send + 'a>>
    where
        Self: 'a;

    fn resolve_public_key<'a>(
        &'a self,
        domain: &'a DomainName,
        selector: &'a Selector,
    ) -> Self::Query<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                time::sleep(delay).await;
            }

            let key = (domain.as_ref().to_owned(), selector.as_ref().to_owned());
            self.keys
                .get(&key)
                .cloned()
                .unwrap_or(Err(KeyLookupError::NotFound))
        })
    }
}

pub async fn read_signing_key_from_file(file_name: &str) -> io::Result<SigningKey> {
    let s = fs::read_to_string(file_name).await?;
    Ok(SigningKey::from_pem(&s).unwrap())
}

pub async fn read_key_pair(file_name: &str) -> (SigningKey, VerifyingKey) {
    let signing_key = read_signing_key_from_file(file_name).await.unwrap();
    let verifying_key = VerifyingKey::from(&signing_key);
    (signing_key, verifying_key)
}

/// Returns the base64 key data of a public key PEM file, as found in the
/// *p=* tag of a key record.
pub async fn read_public_key_file_base64(file_name: &str) -> io::Result<String> {
    let s = fs::read_to_string(file_name).await?;
    Ok(s.lines().filter(|l| !l.starts_with("-----")).collect())
}

pub fn make_request(
    domain: &str,
    selector: &str,
    signing_key: SigningKey,
) -> SignRequest<SigningKey> {
    let algorithm = SignatureAlgorithm::from((signing_key.key_type(), Default::default()));
    SignRequest::new(
        DomainName::new(domain).unwrap(),
        Selector::new(selector).unwrap(),
        algorithm,
        signing_key,
    )
}

pub fn make_message() -> Message {
    Message::parse(
        b"\
From: Alice <alice@example.com>\r
To: Bob <bob@example.org>\r
Subject: Greetings\r
 from the\r
\tcoast\r
Date: Sat, 17 Oct 2026 09:12:44 +0200\r
Message-ID: <20261017091244.1@example.com>\r
\r
Hello Bob,\r
\r
   the  weather is fine.  \r
\r
\r
",
    )
    .unwrap()
}

/// Returns a copy of the message with the signature prepended.
pub fn attach_signature(message: &Message, result: &SigningResult) -> Message {
    let mut signed = message.clone();
    signed.prepend_header(result.to_header_field().unwrap());
    signed
}

