//! services/sync_server/src/bin/issue_token.rs
//!
//! Prints a bootstrap token for a subject, signed with `AUTH_TOKEN_SECRET`.
//!
//! Usage: `issue_token <subject> [ttl_hours]`

use chrono::Duration;
use sync_server_lib::adapters::identity::issue_token;

/// Tokens are valid for a day unless told otherwise.
const DEFAULT_TTL_HOURS: i64 = 24;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let secret = std::env::var("AUTH_TOKEN_SECRET")
        .map_err(|_| "AUTH_TOKEN_SECRET must be set to sign tokens")?;

    let mut args = std::env::args().skip(1);
    let subject = args.next().ok_or("usage: issue_token <subject> [ttl_hours]")?;
    let ttl_hours = match args.next() {
        Some(hours) => hours.parse::<i64>()?,
        None => DEFAULT_TTL_HOURS,
    };

    let token = issue_token(&secret, &subject, Duration::hours(ttl_hours))?;
    println!("{}", token);
    Ok(())
}
