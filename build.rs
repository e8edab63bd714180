//! Forwards WiFi and SMTP credentials from `.env` (or the environment) to
//! `env!` in `src/config.rs`.

const CREDENTIALS: [&str; 9] = [
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "SMTP_HOST",
    "SMTP_PORT",
    "SMTP_FROM_NAME",
    "SMTP_FROM_EMAIL",
    "SMTP_PASSWORD",
    "SMTP_TO_EMAIL1",
    "SMTP_TO_EMAIL2",
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    for key in CREDENTIALS {
        println!("cargo:rerun-if-env-changed={key}");
    }

    // a missing .env is fine when the variables come from the environment
    if let Ok(entries) = dotenvy::dotenv_iter() {
        for (key, value) in entries.flatten() {
            if CREDENTIALS.contains(&key.as_str()) {
                println!("cargo:rustc-env={key}={value}");
            }
        }
    }

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}
