use std::{
    env,
    io,
};

use sequoia_openpgp::serialize::Serialize;

use hkp_client::{KeyServer, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let url = env::args()
        .nth(1).expect("Usage: hkp-get <URL> <KEYID>");
    let keyid = env::args()
        .nth(2).expect("Usage: hkp-get <URL> <KEYID>");

    let keyserver = KeyServer::new(&url)?;
    let cert = keyserver.get_by_id(&keyid).await?;
    cert.armored().serialize(&mut io::stdout())?;
    Ok(())
}
