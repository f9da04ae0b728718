use std::time::Duration;

/// Process configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Origins allowed by CORS. Comma-separated in `ALLOWED_ORIGINS`,
    /// useful for dev + prod behind different hosts.
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .expect("Invalid PORT");

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_else(|_| vec!["http://localhost:3001".to_string()]);

        Self {
            port,
            allowed_origins,
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Gameplay constants. Coordinates are in field units; the field matches
/// the original 1920-wide canvas the clients render.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub field_width: f64,
    /// Hearts past this y are considered missed and dropped.
    pub bottom_bound: f64,
    pub basket_width: f64,
    pub basket_height: f64,
    pub bar_thickness: f64,
    /// Winning score in target mode.
    pub target_score: u32,
    /// Starting x positions for slots 1 and 2.
    pub slot_start_x: [f64; 2],
    pub default_screen_height: f64,
    pub default_basket_y: f64,
    /// Catch line sits this far above the reported viewport bottom.
    pub catch_line_offset: f64,
    /// Catch line when no geometry was ever reported.
    pub catch_line_fallback: f64,
    pub spawn_interval: Duration,
    pub tick_interval: Duration,
    /// How long a finished room lingers so clients can show the result.
    pub gameover_grace: Duration,
    pub idle_sweep_interval: Duration,
    /// An empty, inactive room with no traffic for this long is removed.
    pub idle_timeout: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            field_width: 1920.0,
            bottom_bound: 2000.0,
            basket_width: 150.0,
            basket_height: 25.0,
            bar_thickness: 10.0,
            target_score: 50,
            slot_start_x: [200.0, 600.0],
            default_screen_height: 1080.0,
            default_basket_y: 980.0,
            catch_line_offset: 110.0,
            catch_line_fallback: 970.0,
            spawn_interval: Duration::from_millis(800),
            tick_interval: Duration::from_secs_f64(1.0 / 60.0),
            gameover_grace: Duration::from_secs(10),
            idle_sweep_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_split_and_trimmed() {
        let origins = parse_origins("http://localhost:3001, https://game.example.com ,");
        assert_eq!(
            origins,
            vec![
                "http://localhost:3001".to_string(),
                "https://game.example.com".to_string(),
            ]
        );
    }

    #[test]
    fn empty_origins_yield_nothing() {
        assert!(parse_origins("  ,  ").is_empty());
    }
}
