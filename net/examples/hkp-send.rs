use std::{
    env,
    fs,
};

use hkp_client::{KeyServer, Published, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let url = env::args()
        .nth(1).expect("Usage: hkp-send <URL> <FILE>");
    let armored = fs::read_to_string(env::args()
        .nth(2).expect("Usage: hkp-send <URL> <FILE>"))?;

    let keyserver = KeyServer::new(&url)?;
    match keyserver.publish(&armored).await? {
        Published::Uploaded => eprintln!("Uploaded."),
        Published::AlreadyPresent => eprintln!("Already on the keyserver."),
    }
    Ok(())
}
