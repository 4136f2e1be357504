use std::{
    env,
    io,
};

use sequoia_openpgp::serialize::Serialize;

use hkp_client::{KeyServer, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let url = env::args()
        .nth(1).expect("Usage: hkp-search <URL> <EMAIL>");
    let email = env::args()
        .nth(2).expect("Usage: hkp-search <URL> <EMAIL>");

    let keyserver = KeyServer::new(&url)?;
    let cert = keyserver.get_key_by_email(&email).await?;
    eprintln!("Found {}", cert.fingerprint());
    cert.armored().serialize(&mut io::stdout())?;
    Ok(())
}
