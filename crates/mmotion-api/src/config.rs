//! API configuration.

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Submissions per second allowed per owner
    pub submit_rate_per_sec: u32,
    /// Submission burst allowance per owner
    pub submit_burst: u32,
    /// Max accepted upload size in bytes
    pub max_upload_size: usize,
    /// Parameter keys every submission must carry (empty: none required)
    pub required_parameters: Vec<String>,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            submit_rate_per_sec: 1,
            submit_burst: 5,
            max_upload_size: 50 * 1024 * 1024, // 50MB, matching the edge limit
            required_parameters: Vec::new(),
            jwt_secret: "dev-secret-change-me".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            submit_rate_per_sec: std::env::var("SUBMIT_RATE_PER_SEC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            submit_burst: std::env::var("SUBMIT_BURST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            max_upload_size: std::env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50 * 1024 * 1024),
            required_parameters: std::env::var("REQUIRED_PARAMETERS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-me".to_string()),
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
