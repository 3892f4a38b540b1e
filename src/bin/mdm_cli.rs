use std::{env, sync::Arc};

use anyhow::{bail, Context, Result};
use mdm_backend::{
    checksum::{self, ProvisioningSettings},
    config::AppConfig,
    google::AndroidManagementClient,
    state::AppState,
};
use serde::Serialize;

const USAGE: &str = "usage: mdm-cli <command>

commands:
  checksum [path]                         SHA-256 signature checksum of the DPC APK
  enrollment-token [policy] [duration]    create an enrollment token (default policy1, 3600s)
  devices                                 list enrolled devices
  enterprise                              show the configured enterprise";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };

    match command.as_str() {
        "checksum" => print_checksum(args.get(1).map(String::as_str)).await,
        "enrollment-token" => {
            let amapi = amapi()?;
            let token = amapi
                .create_enrollment_token(
                    args.get(1).map(String::as_str),
                    args.get(2).map(String::as_str),
                )
                .await?;
            print_json(&token)
        }
        "devices" => {
            let devices = amapi()?.list_devices().await?;
            println!("{} device(s) enrolled", devices.len());
            print_json(&devices)
        }
        "enterprise" => print_json(&amapi()?.get_enterprise().await?),
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    }
}

async fn print_checksum(path: Option<&str>) -> Result<()> {
    let settings = provisioning();
    let result = match path {
        Some(path) => checksum::calculate_signature_checksum(path).await?,
        None => checksum::dpc_checksum(&settings).await?,
    };

    println!("hex:       {}", result.checksum);
    println!("base64url: {}", result.checksum_base64_url);
    println!("file:      {} ({} bytes)", result.file_path, result.file_size);
    println!();
    println!("provisioning payload:");
    print_json(&checksum::provisioning_payload(&settings, &result))
}

/// Provisioning settings from the environment. Checksums need no
/// enterprise, so an incomplete environment still yields the defaults.
fn provisioning() -> ProvisioningSettings {
    match AppConfig::from_env() {
        Ok(config) => config.provisioning,
        Err(_) => {
            let mut settings = AppConfig::for_enterprise("unset").provisioning;
            settings.apk_path = env::var("APK_PATH").ok().map(Into::into);
            settings
        }
    }
}

fn amapi() -> Result<Arc<AndroidManagementClient>> {
    let config = AppConfig::from_env()?;
    let http = AppState::http_client(&config)?;
    AppState::amapi_client(&config, &http)
        .context("Android Management API is not configured; check GOOGLE_APPLICATION_CREDENTIALS")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
