use dkim_engine::{signature::CanonicalizationAlgorithm::Relaxed, Engine, EngineConfig, Message, SignRequest};
use std::{env, process};
use tokio::{
    fs,
    io::{self, AsyncReadExt},
};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut args = env::args();

    let (key_file, domain, selector, headers) = match (
        args.next().as_deref(),
        args.next(),
        args.next(),
        args.next(),
        args.next(),
    ) {
        (_, Some(key_file), Some(domain), Some(selector), headers) => {
            (key_file, domain, selector, headers.unwrap_or_else(|| "From:To:Subject:Date".into()))
        }
        (program, ..) => {
            eprintln!(
                "usage: {} <key_file> <domain> <selector> [<header>:<header>...]",
                program.unwrap_or("dkimsign")
            );
            process::exit(1);
        }
    };

    let key_pem = fs::read_to_string(key_file).await.unwrap();
    let headers: Vec<_> = headers.split(':').collect();

    let mut request = SignRequest::from_parts(&domain, &selector, &headers, &key_pem).unwrap();
    request.canonicalization = (Relaxed, Relaxed).into();
    request.allow_missing_headers = true;

    let mut msg = vec![];
    let n = io::stdin().read_to_end(&mut msg).await.unwrap();
    assert!(n > 0, "empty message on stdin");

    let msg = Message::parse(&msg).unwrap();

    let engine = Engine::init(EngineConfig::default()).unwrap();

    match engine.sign(request, &msg) {
        Ok(result) => {
            println!("{}", result.format_header().replace("\r\n", "\n"));
        }
        Err(e) => {
            eprintln!("ERROR: {e} (status {})", e.status().code());
            process::exit(1);
        }
    }

    engine.shutdown();
}
