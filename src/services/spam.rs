// src/services/spam.rs

/// Perfil de quem pediu para entrar, como o pontuador o enxerga.
#[derive(Debug, Clone, Default)]
pub struct JoinProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub has_photo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamVerdict {
    /// 0..=100
    pub score: i32,
    pub reasons: Vec<String>,
}

pub trait SpamScorer: Send + Sync {
    fn score(&self, profile: &JoinProfile) -> SpamVerdict;
}

const PROMO_WORDS: [&str; 10] = [
    "crypto", "bitcoin", "invest", "forex", "casino", "airdrop", "earn", "promo", "giveaway", "заработ",
];
const LINK_MARKERS: [&str; 4] = ["http://", "https://", "t.me/", "www."];

/// Heurística padrão: sinais simples de conta descartável ou de divulgação.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicSpamScorer;

impl SpamScorer for HeuristicSpamScorer {
    fn score(&self, profile: &JoinProfile) -> SpamVerdict {
        let mut score = 0;
        let mut reasons = Vec::new();
        let mut flag = |points: i32, reason: &str| {
            score += points;
            reasons.push(reason.to_string());
        };

        if profile.username.as_deref().is_none_or(|u| u.trim().is_empty()) {
            flag(20, "no_username");
        }
        if !profile.has_photo {
            flag(20, "no_photo");
        }

        if let Some(bio) = profile.bio.as_deref().map(str::to_lowercase) {
            if LINK_MARKERS.iter().any(|m| bio.contains(m)) {
                flag(30, "link_in_bio");
            }
            if PROMO_WORDS.iter().any(|w| bio.contains(w)) {
                flag(25, "promo_words_in_bio");
            }
        }

        let name: String = [profile.first_name.as_deref(), profile.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let digits = name.chars().filter(char::is_ascii_digit).count();
        let letters = name.chars().filter(|c| c.is_alphabetic()).count();
        if digits >= 3 || (digits > 0 && digits * 10 > name.chars().count() * 3) {
            flag(15, "digit_heavy_name");
        }
        if !name.trim().is_empty() && letters == 0 {
            flag(15, "name_without_letters");
        }

        SpamVerdict { score: score.min(100), reasons }
    }
}

#[cfg(test)]
pub struct FixedScorer(pub i32);

#[cfg(test)]
impl SpamScorer for FixedScorer {
    fn score(&self, _profile: &JoinProfile) -> SpamVerdict {
        SpamVerdict { score: self.0, reasons: vec!["fixed".into()] }
    }
}
