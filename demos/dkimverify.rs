use bstr::ByteSlice;
use dkim_engine::{
    crypto::VerifyingKey,
    signature::{DomainName, Selector},
    verifier::{self, KeyLookupError, KeyResolver},
    Engine, EngineConfig, Message,
};
use std::{env, future, process};
use tokio::{
    fs,
    io::{self, AsyncReadExt},
};

// Serves the key from a single key record for every domain and selector.
struct StaticResolver {
    key: Result<VerifyingKey, KeyLookupError>,
}

impl KeyResolver for StaticResolver {
    type Query<'a> = future::Ready<Result<VerifyingKey, KeyLookupError>>;

    fn resolve_public_key<'a>(&'a self, _: &'a DomainName, _: &'a Selector) -> Self::Query<'a> {
        future::ready(self.key.clone())
    }
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = env::args();

    let record_file = match (args.next().as_deref(), args.next(), args.next()) {
        (_, Some(record_file), None) => record_file,
        (program, ..) => {
            eprintln!("usage: {} <key_record_file>", program.unwrap_or("dkimverify"));
            process::exit(1);
        }
    };

    let record = fs::read(record_file).await.unwrap();
    let resolver = StaticResolver {
        key: verifier::read_public_key(record.trim()),
    };

    let mut msg = vec![];
    let n = io::stdin().read_to_end(&mut msg).await.unwrap();
    assert!(n > 0, "empty message on stdin");

    let msg = Message::parse(&msg).unwrap();

    let config = EngineConfig {
        fail_if_expired: false,
        ..Default::default()
    };
    let engine = Engine::init(config).unwrap();

    let report = engine.verify(&msg, &resolver).await.unwrap();

    for (i, result) in report.results().iter().enumerate() {
        println!();
        println!("SIGNATURE {}", i + 1);
        if let Some(sig) = &result.signature {
            println!("{sig:#?}");
        }
        match &result.error {
            Some(e) => println!("{} ({e})", result.status),
            None => println!("{}", result.status),
        }
    }

    println!();
    println!("{}", report.status());
}
