const CONFIG_PATH: &str = "PROBEWATCH_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "probewatch.json";

pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const PUSHOVER_TOKEN: &str = "PUSHOVER_TOKEN";

pub fn get_pushover_token() -> Option<String> {
    std::env::var(PUSHOVER_TOKEN).ok().filter(|token| !token.is_empty())
}

const PUSHOVER_USER: &str = "PUSHOVER_USER";

pub fn get_pushover_user() -> Option<String> {
    std::env::var(PUSHOVER_USER).ok().filter(|user| !user.is_empty())
}
