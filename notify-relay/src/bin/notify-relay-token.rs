use notify_relay::api::jwt::JwtService;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let user_id = &args[0];
    let roles: Vec<String> = args[1..]
        .iter()
        .flat_map(|r| r.split(','))
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();

    let jwt = JwtService::from_env()
        .ok_or_else(|| anyhow::anyhow!("JWT_SECRET must be set to mint tokens"))?;
    println!("{}", jwt.generate_token(user_id, roles)?);
    Ok(())
}

fn print_help() {
    println!("notify-relay-token - Mint a bearer token for notify-relay");
    println!();
    println!("Usage:");
    println!("  notify-relay-token <user-id> [role,...]");
    println!();
    println!("Examples:");
    println!("  notify-relay-token learner-42");
    println!("  notify-relay-token quiz-service system");
    println!();
    println!("Reads JWT_SECRET, JWT_ISSUER, JWT_AUDIENCE and JWT_EXPIRATION_SECS.");
}
