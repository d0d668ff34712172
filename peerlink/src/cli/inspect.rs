//! Offline helpers for the identity primitives.

pub fn generation_tag(identifier: &str, handle: &str) -> eyre::Result<()> {
    let identifier: peerlink::PeerIdentifier = identifier.parse()?;
    let tag = peerlink::make_generation_tag(&identifier, handle);
    println!("{tag}");
    Ok(())
}

pub fn parse_context(context: &str) -> eyre::Result<()> {
    match context.parse::<peerlink::InvitationContext>() {
        Ok(parsed) => {
            println!("✅ Valid invitation context");
            println!("   sender:     {}", parsed.sender);
            println!("   addressee:  {}", parsed.addressee);
            println!("   generation: {}", parsed.generation_suffix);
            Ok(())
        }
        Err(e) => {
            println!("❌ {e}");
            Err(e.into())
        }
    }
}
