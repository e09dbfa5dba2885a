use rand::Rng;

/// Browser identity presented during extraction
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub timezone: String,
    pub locale: String,
}

impl FingerprintConfig {
    /// Generate a randomized fingerprint configuration
    pub fn randomized() -> Self {
        Self::randomized_with(&mut rand::thread_rng())
    }

    /// Generate a fingerprint from the given random source
    pub fn randomized_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // Common US desktop user agents
        let user_agents = [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        ];

        let viewports = [(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

        // US zones only, matching the en-US locale
        let timezones = ["America/New_York", "America/Chicago", "America/Los_Angeles"];

        let (width, height) = viewports[rng.gen_range(0..viewports.len())];

        Self {
            user_agent: user_agents[rng.gen_range(0..user_agents.len())].to_string(),
            viewport_width: width,
            viewport_height: height,
            timezone: timezones[rng.gen_range(0..timezones.len())].to_string(),
            locale: "en-US".to_string(),
        }
    }

    /// `Accept-Language` value matching the locale.
    pub fn accept_language(&self) -> String {
        let primary = self.locale.split('-').next().unwrap_or("en");
        format!("{},{};q=0.9", self.locale, primary)
    }
}
