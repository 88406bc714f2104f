// libs/telehealth-cell/src/services/links.rs
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, warn};

use shared_config::MeetingLinkConfig;

use crate::error::TelehealthError;
use crate::models::{GeneratedLinks, MeetingProvider};

const SLUG_BYTES: usize = 5;
const SLUG_PLACEHOLDER: &str = "{{slug}}";
const APPOINTMENT_PLACEHOLDER: &str = "{{appointment_id}}";

/// 10 lowercase hex characters from the OS random source
pub fn random_slug() -> String {
    let mut bytes = [0u8; SLUG_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `xxx-xxxx-xxx` built from the slug, one letter per hex digit
fn meet_code(slug: &str) -> String {
    let letters: String = slug
        .chars()
        .filter_map(|c| c.to_digit(16))
        .map(|digit| char::from(b'a' + digit as u8))
        .collect();

    let (first, rest) = letters.split_at(3.min(letters.len()));
    let (second, third) = rest.split_at(4.min(rest.len()));
    format!("{}-{}-{}", first, second, third)
}

/// Standalone meeting links (Jitsi, Google Meet, Doxy.me, Doximity, custom template).
/// No network I/O and no persistence.
#[derive(Debug, Clone)]
pub struct MeetingLinkProvider {
    config: MeetingLinkConfig,
}

impl MeetingLinkProvider {
    pub fn new(config: &MeetingLinkConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Provider named by `MEETING_PROVIDER`, with its static room checked when it needs one
    pub fn default_provider(&self) -> Result<MeetingProvider, TelehealthError> {
        match self.config.provider.parse::<MeetingProvider>()? {
            MeetingProvider::Telesalud => Err(TelehealthError::ValidationError {
                message: "telesalud is not a standalone meeting provider".to_string(),
            }),
            MeetingProvider::DoxyMe => {
                static_room(&self.config.doxy_me_room_url, "DOXY_ME_ROOM_URL")?;
                Ok(MeetingProvider::DoxyMe)
            }
            MeetingProvider::Doximity => {
                static_room(&self.config.doximity_room_url, "DOXIMITY_ROOM_URL")?;
                Ok(MeetingProvider::Doximity)
            }
            provider => Ok(provider),
        }
    }

    pub fn generate(
        &self,
        appointment_id: i64,
        provider: MeetingProvider,
    ) -> Result<GeneratedLinks, TelehealthError> {
        self.generate_with_slug(appointment_id, provider, &random_slug())
    }

    pub fn generate_with_slug(
        &self,
        appointment_id: i64,
        provider: MeetingProvider,
        slug: &str,
    ) -> Result<GeneratedLinks, TelehealthError> {
        debug!("Generating {:?} link for appointment {}", provider, appointment_id);

        match provider {
            MeetingProvider::Jitsi => Ok(self.jitsi(appointment_id, slug)),
            MeetingProvider::GoogleMeet => {
                let url = format!("https://meet.google.com/{}", meet_code(slug));
                Ok(shared_room(MeetingProvider::GoogleMeet, url, Some(slug)))
            }
            MeetingProvider::DoxyMe => {
                let url = static_room(&self.config.doxy_me_room_url, "DOXY_ME_ROOM_URL")?;
                Ok(shared_room(MeetingProvider::DoxyMe, url, None))
            }
            MeetingProvider::Doximity => {
                let url = static_room(&self.config.doximity_room_url, "DOXIMITY_ROOM_URL")?;
                Ok(shared_room(MeetingProvider::Doximity, url, None))
            }
            MeetingProvider::Template => match self.config.url_template.as_deref().map(str::trim) {
                Some(template) if !template.is_empty() => {
                    Ok(shared_room(
                        MeetingProvider::Template,
                        fill_template(template, appointment_id, slug),
                        Some(slug),
                    ))
                }
                _ => {
                    warn!("MEETING_URL_TEMPLATE not set, falling back to Jitsi");
                    Ok(self.jitsi(appointment_id, slug))
                }
            },
            MeetingProvider::Telesalud => Err(TelehealthError::ValidationError {
                message: "telesalud meetings are created by the remote backend".to_string(),
            }),
        }
    }

    fn jitsi(&self, appointment_id: i64, slug: &str) -> GeneratedLinks {
        let url = format!(
            "{}/EMRTelevisit-{}-{}",
            self.config.jitsi_base_url.trim_end_matches('/'),
            appointment_id,
            slug
        );
        shared_room(MeetingProvider::Jitsi, url, Some(slug))
    }
}

fn shared_room(provider: MeetingProvider, url: String, token: Option<&str>) -> GeneratedLinks {
    GeneratedLinks {
        provider,
        provider_url: url.clone(),
        patient_url: url,
        token: token.map(str::to_string),
    }
}

fn static_room(url: &Option<String>, setting: &str) -> Result<String, TelehealthError> {
    url.as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TelehealthError::ConfigurationMissing {
            setting: setting.to_string(),
        })
}

fn fill_template(template: &str, appointment_id: i64, slug: &str) -> String {
    let filled = template.replace(APPOINTMENT_PLACEHOLDER, &appointment_id.to_string());
    if filled.contains(SLUG_PLACEHOLDER) {
        filled.replace(SLUG_PLACEHOLDER, slug)
    } else {
        format!("{}/{}", filled.trim_end_matches('/'), slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with(config: MeetingLinkConfig) -> MeetingLinkProvider {
        MeetingLinkProvider::new(&config)
    }

    #[test]
    fn test_random_slug_shape() {
        let slug = random_slug();
        assert_eq!(slug.len(), 10);
        assert!(slug.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(slug, random_slug());
    }

    #[test]
    fn test_jitsi_link() {
        let links = provider_with(MeetingLinkConfig::default())
            .generate_with_slug(1001, MeetingProvider::Jitsi, "0a1b2c3d4e")
            .unwrap();

        assert_eq!(links.provider_url, "https://meet.jit.si/EMRTelevisit-1001-0a1b2c3d4e");
        assert_eq!(links.patient_url, links.provider_url);
        assert_eq!(links.token.as_deref(), Some("0a1b2c3d4e"));
    }

    #[test]
    fn test_google_meet_code() {
        let links = provider_with(MeetingLinkConfig::default())
            .generate_with_slug(5, MeetingProvider::GoogleMeet, "0123456789")
            .unwrap();

        assert_eq!(links.provider_url, "https://meet.google.com/abc-defg-hij");
    }

    #[test]
    fn test_static_rooms_require_configuration() {
        let provider = provider_with(MeetingLinkConfig::default());
        assert!(matches!(
            provider.generate(1, MeetingProvider::DoxyMe),
            Err(TelehealthError::ConfigurationMissing { ref setting }) if setting == "DOXY_ME_ROOM_URL"
        ));

        let provider = provider_with(MeetingLinkConfig {
            doximity_room_url: Some("https://doximity.com/room/dr-rivera".to_string()),
            ..MeetingLinkConfig::default()
        });
        let links = provider.generate(1, MeetingProvider::Doximity).unwrap();
        assert_eq!(links.patient_url, "https://doximity.com/room/dr-rivera");
        assert_eq!(links.token, None);
    }

    #[test]
    fn test_template_substitution_and_append() {
        let with_placeholder = provider_with(MeetingLinkConfig {
            url_template: Some("https://video.clinic.example/{{appointment_id}}/{{slug}}".to_string()),
            ..MeetingLinkConfig::default()
        });
        let links = with_placeholder
            .generate_with_slug(77, MeetingProvider::Template, "ffffffffff")
            .unwrap();
        assert_eq!(links.provider_url, "https://video.clinic.example/77/ffffffffff");

        let without_placeholder = provider_with(MeetingLinkConfig {
            url_template: Some("https://video.clinic.example/rooms/".to_string()),
            ..MeetingLinkConfig::default()
        });
        let links = without_placeholder
            .generate_with_slug(77, MeetingProvider::Template, "ffffffffff")
            .unwrap();
        assert_eq!(links.provider_url, "https://video.clinic.example/rooms/ffffffffff");
    }

    #[test]
    fn test_unset_template_falls_back_to_jitsi() {
        let links = provider_with(MeetingLinkConfig::default())
            .generate_with_slug(3, MeetingProvider::Template, "abcdefabcd")
            .unwrap();
        assert_eq!(links.provider, MeetingProvider::Jitsi);
        assert_eq!(links.provider_url, "https://meet.jit.si/EMRTelevisit-3-abcdefabcd");
    }

    #[test]
    fn test_default_provider_rejects_telesalud() {
        let provider = provider_with(MeetingLinkConfig {
            provider: "telesalud".to_string(),
            ..MeetingLinkConfig::default()
        });
        assert!(provider.default_provider().is_err());

        let unset_room = provider_with(MeetingLinkConfig {
            provider: "doximity".to_string(),
            ..MeetingLinkConfig::default()
        });
        assert!(matches!(
            unset_room.default_provider(),
            Err(TelehealthError::ConfigurationMissing { .. })
        ));

        assert_eq!(
            provider_with(MeetingLinkConfig::default()).default_provider().unwrap(),
            MeetingProvider::Jitsi
        );
    }
}
