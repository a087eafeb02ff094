//! Bakes network credentials from `.env` into the firmware image.
//!
//! Each key is forwarded as a `rustc-env` so `config.rs` can pick it up with
//! `option_env!`. Missing keys fall back to the defaults in `config.rs`.

const BAKED_KEYS: [&str; 5] = [
    "DOZER_WIFI_SSID",
    "DOZER_WIFI_PASSWORD",
    "DOZER_MQTT_HOST",
    "DOZER_MQTT_USERNAME",
    "DOZER_MQTT_PASSWORD",
];

fn main() {
    // Watched even when absent so creating it later triggers a rebuild.
    println!("cargo:rerun-if-changed=.env");

    // A missing .env is fine, plain environment variables still apply.
    if let Ok(path) = dotenvy::dotenv() {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    for key in BAKED_KEYS {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = dotenvy::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }
}
