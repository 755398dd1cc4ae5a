//! Local ledger administration.

use anyhow::Context;

use anchorline_shared::Address;

use crate::state::ClientState;

pub fn add_member(state: &ClientState, server_id: u64, address: &str) -> anyhow::Result<()> {
    let address = Address::parse(address).context("invalid member address")?;
    state.ledger.add_member(server_id, &address)?;
    println!("{address} may now post in server {server_id}");
    Ok(())
}
