//! The preset API catalog and its HTTP executor.
//!
//! Nine curated integrations: weather, stock, crypto, sun, air_quality,
//! time, fear_greed, github_repo, random. All keyless public endpoints so
//! the lamp works out of the box.

use chrono::{Datelike, Local, Timelike};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::time::Duration;

use async_trait::async_trait;

use super::{ApiExecutor, ApiResponse};

/// The fixed preset set. Out-of-set names return `unknown api`.
pub const PRESET_API_NAMES: [&str; 9] = [
    "weather",
    "stock",
    "crypto",
    "sun",
    "air_quality",
    "time",
    "fear_greed",
    "github_repo",
    "random",
];

/// Catalog metadata served by `listAPIs`: name, description, params, and an
/// example response the agent can pattern on.
pub fn catalog() -> Value {
    json!([
        {
            "name": "weather",
            "description": "Current weather conditions for a location",
            "params": {"location": "City name or 'lat,lon' coordinates (required)"},
            "example_response": {"temp_f": 65, "temp_c": 18, "condition": "cloudy",
                                 "humidity": 72, "wind_mph": 8, "is_day": true},
        },
        {
            "name": "stock",
            "description": "Stock price and daily change percentage",
            "params": {"symbol": "Ticker symbol, e.g. AAPL (required)"},
            "example_response": {"price": 178.52, "change_percent": 1.23, "symbol": "AAPL"},
        },
        {
            "name": "crypto",
            "description": "Cryptocurrency price and 24-hour change",
            "params": {"coin": "Coin id in lowercase, e.g. bitcoin (required)"},
            "example_response": {"price_usd": 43250.0, "change_24h": -2.5, "coin": "bitcoin"},
        },
        {
            "name": "sun",
            "description": "Sunrise/sunset times and daylight status",
            "params": {"location": "City name or 'lat,lon' coordinates (required)"},
            "example_response": {"sunrise": "07:12", "sunset": "18:40", "is_daytime": true},
        },
        {
            "name": "air_quality",
            "description": "Air quality index for a location",
            "params": {"location": "City name or 'lat,lon' coordinates (required)"},
            "example_response": {"aqi": 42, "pm2_5": 9.1},
        },
        {
            "name": "time",
            "description": "Local wall-clock time",
            "params": {},
            "example_response": {"hour": 21, "minute": 30, "second": 5, "weekday": 4},
        },
        {
            "name": "fear_greed",
            "description": "Crypto fear & greed index",
            "params": {},
            "example_response": {"value": 61, "classification": "Greed"},
        },
        {
            "name": "github_repo",
            "description": "Repository stars, forks, and open issues",
            "params": {"repo": "owner/name, e.g. rust-lang/rust (required)"},
            "example_response": {"stars": 95000, "forks": 12000, "open_issues": 9000},
        },
        {
            "name": "random",
            "description": "Uniform random integer",
            "params": {"min": "Lower bound (default 0)", "max": "Upper bound (default 255)"},
            "example_response": {"value": 137},
        },
    ])
}

/// HTTP-backed executor for the preset set.
pub struct PresetApiExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl PresetApiExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, String> {
        let response = self
            .client
            .get(url)
            .header("user-agent", "lumen-lamp")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("request failed with {}", response.status()));
        }
        response.json().await.map_err(|e| e.to_string())
    }

    /// Resolve "lat,lon" directly, otherwise geocode a place name.
    async fn resolve_location(&self, location: &str) -> Result<(f64, f64), String> {
        if let Some((lat, lon)) = location.split_once(',') {
            if let (Ok(lat), Ok(lon)) = (lat.trim().parse(), lon.trim().parse()) {
                return Ok((lat, lon));
            }
        }
        let url = format!(
            "https://geocoding-api.open-meteo.com/v1/search?name={}&count=1",
            urlencode(location)
        );
        let data = self.get_json(&url).await?;
        let hit = data["results"]
            .get(0)
            .ok_or_else(|| format!("location '{location}' not found"))?;
        match (hit["latitude"].as_f64(), hit["longitude"].as_f64()) {
            (Some(lat), Some(lon)) => Ok((lat, lon)),
            _ => Err("geocoder returned no coordinates".to_string()),
        }
    }

    async fn weather(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let location = require_str(params, "location")?;
        let (lat, lon) = self.resolve_location(location).await?;
        let url = format!(
            "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}\
             &current=temperature_2m,relative_humidity_2m,weather_code,wind_speed_10m,is_day"
        );
        let data = self.get_json(&url).await?;
        let current = &data["current"];
        let temp_c = current["temperature_2m"].as_f64().unwrap_or(0.0);
        let code = current["weather_code"].as_u64().unwrap_or(0);
        Ok(json!({
            "temp_c": temp_c,
            "temp_f": (temp_c * 9.0 / 5.0 + 32.0).round(),
            "condition": condition_for_code(code),
            "humidity": current["relative_humidity_2m"],
            "wind_mph": current["wind_speed_10m"].as_f64().map(|kmh| (kmh * 0.621).round()),
            "is_day": current["is_day"].as_u64().map(|d| d == 1),
        }))
    }

    async fn stock(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let symbol = require_str(params, "symbol")?;
        let url = format!(
            "https://stooq.com/q/l/?s={}.us&f=sd2t2ohlcv&h&e=json",
            urlencode(&symbol.to_lowercase())
        );
        let data = self.get_json(&url).await?;
        let quote = data["symbols"]
            .get(0)
            .ok_or_else(|| format!("no quote for '{symbol}'"))?;
        let open = quote["open"].as_f64().unwrap_or(0.0);
        let close = quote["close"].as_f64().unwrap_or(0.0);
        let change = if open != 0.0 {
            (close - open) / open * 100.0
        } else {
            0.0
        };
        Ok(json!({
            "symbol": symbol.to_uppercase(),
            "price": close,
            "change_percent": (change * 100.0).round() / 100.0,
            "change_absolute": close - open,
            "volume": quote["volume"],
        }))
    }

    async fn crypto(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let coin = require_str(params, "coin")?.to_lowercase();
        let url = format!(
            "https://api.coingecko.com/api/v3/simple/price?ids={}\
             &vs_currencies=usd&include_24hr_change=true&include_market_cap=true&include_24hr_vol=true",
            urlencode(&coin)
        );
        let data = self.get_json(&url).await?;
        let entry = data
            .get(&coin)
            .filter(|e| !e.is_null())
            .ok_or_else(|| format!("unknown coin '{coin}'"))?;
        Ok(json!({
            "coin": coin,
            "price_usd": entry["usd"],
            "change_24h": entry["usd_24h_change"],
            "market_cap": entry["usd_market_cap"],
            "volume_24h": entry["usd_24h_vol"],
        }))
    }

    async fn sun(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let location = require_str(params, "location")?;
        let (lat, lon) = self.resolve_location(location).await?;
        let url = format!("https://api.sunrise-sunset.org/json?lat={lat}&lng={lon}&formatted=0");
        let data = self.get_json(&url).await?;
        let results = &data["results"];
        let sunrise = parse_local_hhmm(results["sunrise"].as_str());
        let sunset = parse_local_hhmm(results["sunset"].as_str());
        let now_minutes = Local::now().hour() * 60 + Local::now().minute();
        let is_daytime = match (&sunrise, &sunset) {
            (Some((sh, sm)), Some((eh, em))) => {
                let start = sh * 60 + sm;
                let end = eh * 60 + em;
                now_minutes >= start && now_minutes <= end
            }
            _ => false,
        };
        Ok(json!({
            "sunrise": sunrise.map(|(h, m)| format!("{h:02}:{m:02}")),
            "sunset": sunset.map(|(h, m)| format!("{h:02}:{m:02}")),
            "is_daytime": is_daytime,
        }))
    }

    async fn air_quality(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let location = require_str(params, "location")?;
        let (lat, lon) = self.resolve_location(location).await?;
        let url = format!(
            "https://air-quality-api.open-meteo.com/v1/air-quality?latitude={lat}&longitude={lon}\
             &current=us_aqi,pm2_5"
        );
        let data = self.get_json(&url).await?;
        Ok(json!({
            "aqi": data["current"]["us_aqi"],
            "pm2_5": data["current"]["pm2_5"],
        }))
    }

    async fn fear_greed(&self) -> Result<Value, String> {
        let data = self.get_json("https://api.alternative.me/fng/").await?;
        let entry = data["data"]
            .get(0)
            .ok_or_else(|| "empty fear/greed response".to_string())?;
        let value: i64 = entry["value"]
            .as_str()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(json!({
            "value": value,
            "classification": entry["value_classification"],
        }))
    }

    async fn github_repo(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = require_str(params, "repo")?;
        if !repo.contains('/') {
            return Err("repo must be owner/name".to_string());
        }
        let data = self
            .get_json(&format!("https://api.github.com/repos/{repo}"))
            .await?;
        Ok(json!({
            "repo": repo,
            "stars": data["stargazers_count"],
            "forks": data["forks_count"],
            "open_issues": data["open_issues_count"],
        }))
    }

    fn time_now() -> Value {
        let now = Local::now();
        json!({
            "hour": now.hour(),
            "minute": now.minute(),
            "second": now.second(),
            "weekday": now.weekday().num_days_from_monday(),
            "iso": now.to_rfc3339(),
            "timestamp": now.timestamp(),
        })
    }

    fn random(params: &Map<String, Value>) -> Result<Value, String> {
        let min = params.get("min").and_then(Value::as_i64).unwrap_or(0);
        let max = params.get("max").and_then(Value::as_i64).unwrap_or(255);
        if min > max {
            return Err(format!("min {min} exceeds max {max}"));
        }
        let value = rand::thread_rng().gen_range(min..=max);
        Ok(json!({ "value": value }))
    }
}

#[async_trait]
impl ApiExecutor for PresetApiExecutor {
    async fn execute(&self, api: &str, params: &Map<String, Value>) -> ApiResponse {
        let result = match api {
            "weather" => self.weather(params).await,
            "stock" => self.stock(params).await,
            "crypto" => self.crypto(params).await,
            "sun" => self.sun(params).await,
            "air_quality" => self.air_quality(params).await,
            "time" => Ok(Self::time_now()),
            "fear_greed" => self.fear_greed().await,
            "github_repo" => self.github_repo(params).await,
            "random" => Self::random(params),
            _ => Err("unknown api".to_string()),
        };
        match result {
            Ok(data) => ApiResponse::ok(api, data),
            Err(error) => {
                tracing::warn!("[API] {api} failed: {error}");
                ApiResponse::fail(api, error)
            }
        }
    }
}

fn require_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required param '{key}'"))
}

/// WMO weather code to the coarse condition words the agent reasons about.
fn condition_for_code(code: u64) -> &'static str {
    match code {
        0 => "sunny",
        1..=3 => "cloudy",
        45 | 48 => "foggy",
        51..=67 | 80..=82 => "rainy",
        71..=77 | 85 | 86 => "snowy",
        95..=99 => "stormy",
        _ => "cloudy",
    }
}

/// Pull HH:MM out of an RFC3339 time, shifted into local time.
fn parse_local_hhmm(text: Option<&str>) -> Option<(u32, u32)> {
    let parsed = chrono::DateTime::parse_from_rfc3339(text?).ok()?;
    let local = parsed.with_timezone(&Local);
    Some((local.hour(), local.minute()))
}

fn urlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(c),
            ' ' => out.push_str("%20"),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).as_bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_the_preset_set() {
        let catalog = catalog();
        let names: Vec<&str> = catalog
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, PRESET_API_NAMES);
    }

    #[test]
    fn weather_codes_map_to_known_conditions() {
        assert_eq!(condition_for_code(0), "sunny");
        assert_eq!(condition_for_code(61), "rainy");
        assert_eq!(condition_for_code(96), "stormy");
    }

    #[test]
    fn urlencode_escapes_spaces_and_unicode() {
        assert_eq!(urlencode("San Francisco"), "San%20Francisco");
        assert_eq!(urlencode("a/b"), "a%2Fb");
    }

    #[tokio::test]
    async fn unknown_api_is_refused() {
        let executor = PresetApiExecutor::new(Duration::from_secs(1));
        let response = executor.execute("nope", &Map::new()).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("unknown api"));
    }

    #[test]
    fn random_respects_bounds() {
        let mut params = Map::new();
        params.insert("min".into(), Value::from(5));
        params.insert("max".into(), Value::from(5));
        let value = PresetApiExecutor::random(&params).unwrap();
        assert_eq!(value["value"], 5);

        params.insert("max".into(), Value::from(1));
        assert!(PresetApiExecutor::random(&params).is_err());
    }
}
