//! Run one DTLS-SRTP client handshake against a peer and print the outcome.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dtls_srtp::certificate::subject;
use dtls_srtp::{
    CertificateVerifier, Config, Connection, Fingerprint, SelfSignedIdentity, UdpTransport,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Remote IPv4 or IPv6 address
    remote_addr: String,

    /// Remote UDP port
    remote_port: u16,

    /// Local address to bind, of the same family as the remote
    #[arg(short, long)]
    local: Option<String>,

    /// Expected SHA-256 fingerprint of the peer certificate
    #[arg(short, long)]
    fingerprint: Option<Fingerprint>,

    /// Colon-separated SRTP profiles to offer, most preferred first
    #[arg(short, long, default_value = "SRTP_AEAD_AES_256_GCM:SRTP_AEAD_AES_128_GCM:SRTP_AES128_CM_SHA1_80")]
    profiles: String,

    /// MTU for outgoing datagrams
    #[arg(long, default_value = "1150")]
    mtu: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::builder()
        .mtu(args.mtu)
        .srtp_profile_list(&args.profiles)?
        .build()?;

    let verifier = match args.fingerprint {
        Some(fp) => CertificateVerifier::fingerprint(fp),
        None => {
            eprintln!("warning: no --fingerprint, the peer is not authenticated");
            CertificateVerifier::unauthenticated()
        }
    };

    let transport = UdpTransport::connect(args.local.as_deref(), &args.remote_addr, args.remote_port)?;
    println!("local {} remote {}", transport.local_addr()?, transport.remote_addr());

    let identity = SelfSignedIdentity::default();
    let mut connection = Connection::new(Arc::new(config), &identity, verifier, transport)?;

    let established = connection.connect()?;

    let peer = subject(&established.peer_certificate).unwrap_or_else(|e| format!("<{}>", e));
    println!("peer subject     {}", peer);
    println!("peer fingerprint {}", established.peer_fingerprint);
    println!("cipher suite     {:?}", established.cipher_suite);
    match (&established.srtp_profile, &established.keys) {
        (Some(profile), Some(keys)) => println!(
            "srtp profile     {} ({} byte keys, {} byte salts)",
            profile,
            keys.client_write_key.len(),
            keys.client_write_salt.len()
        ),
        _ => println!("srtp profile     none"),
    }
    Ok(())
}
