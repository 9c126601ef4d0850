/// Events hub endpoint for a TzKT REST base URL.
pub fn events_hub_url(base_url: &str) -> String {
    format!("{}/v1/ws", base_url.trim_end_matches('/'))
}

pub fn to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}
