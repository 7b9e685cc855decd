use std::process::exit;
use zbridge_core::cli;
use zbridge_core::context::BridgeContext;
use zbridge_core::types::KeyPurpose;

#[tokio::main]
async fn main() {
    let (config, args) = cli::get_keygen_configuration_from_cli();
    let committee = args.committee.or(config.committee_size);

    let context = match BridgeContext::new(config).await {
        Ok(context) => context,
        Err(e) => {
            tracing::error!("Can't initialize: {e}");
            exit(1);
        }
    };

    if let Err(e) = context.registry.refresh().await {
        tracing::error!("Can't read the operator registry: {e}");
        exit(1);
    }

    let key = match context
        .key_manager()
        .generate(args.threshold, args.purpose, committee)
        .await
    {
        Ok(key) => key,
        Err(e) => {
            tracing::error!("Key generation failed: {e}");
            exit(1);
        }
    };

    println!("key id: {}", key.key_id);
    println!("public key: {}", key.public_key);
    if key.purpose == KeyPurpose::BtcCustody {
        println!(
            "custody address: {}",
            key.taproot_address(context.config.network)
        );
    }
}
