use crate::model::ItemType;
use once_cell::sync::Lazy;
use regex::Regex;

const GRADING_COMPANIES: &[&str] = &[
    "psa", "bgs", "sgc", "cgc", "bccg", "gma", "hga", "csg", "aga", "ksa",
    "beckett grading", "professional sports authenticator",
];

const CARD_INDICATORS: &[&str] = &[
    "gem mint", "gem-mt", "mint 9", "mint 10", "nm-mt", "near mint", "pristine 10",
    "black label", "pop 1", "pop 2", "low pop", "high grade",
    "rookie card", "1st bowman", "bowman chrome", "topps chrome", "refractor", "auto #",
    "/10", "/25", "/50", "/75", "/99", "/149", "/199", "/249", "/299", "/499", "/999",
    "serial numbered", "ssp", "short print", "variation", "insert", "parallel",
    "base card", "rookie premiere", "patch card", "jersey card", "relic card",
    "game-used card", "memorabilia card", "dual relic", "triple relic",
    "topps", "panini", "upper deck", "bowman", "fleer", "donruss", "score", "leaf",
    "pinnacle", "pacific", "skybox", "hoops", "stadium club", "finest", "select", "prizm",
    "optic", "mosaic", "chronicles", "national treasures", "immaculate", "flawless",
    "noir", "spectra", "gold standard", "crown royale", "absolute", "contenders",
    "playoff", "certified", "elite", "prestige", "origins", "phoenix", "obsidian",
    "t206", "t205", "e90", "e92", "e98", "w517", "goudey", "play ball", "diamond stars",
    "pokemon tcg", "pokemon card", "shadowless", "1st edition", "base set",
    "magic the gathering", "mtg", "black lotus", "dual land", "yu-gi-oh", "yugioh",
    "blue-eyes", "dark magician",
];

const MEMORABILIA_KEYWORDS: &[&str] = &[
    "jersey", "game-worn", "game worn", "player-worn", "uniform", "warm-up", "warmup",
    "shooting shirt", "cleats", "shoes", "sneakers", "helmet", "glove", "mitt", "bat",
    "ball", "baseball", "football", "basketball", "puck", "equipment", "stick", "racket",
    "golf club", "putter", "trophy", "award", "medal", "championship ring", "ring",
    "pennant", "banner", "flag", "bobblehead", "bobble head", "figurine", "statue",
    "plaque", "display", "shadowbox", "shadow box", "ticket", "ticket stub", "program",
    "yearbook", "media guide", "scorecard", "lineup card", "contract", "document",
    "letter", "telegram", "check", "photograph", "photo", "wire photo", "press photo",
    "poster", "lithograph", "print", "artwork", "painting", "canvas", "framed",
    "magazine", "sports illustrated", "newspaper", "book", "locker", "nameplate",
    "stadium seat", "home plate",
];

const AUTOGRAPH_KEYWORDS: &[&str] = &[
    "signed", "autographed", "autograph", "signature", "hand-signed", "hand signed",
    "inscribed", "inscription", "personalized", "jsa", "psa/dna", "beckett authenticated",
    "uda", "upper deck authenticated", "fanatics authenticated", "mlb authenticated",
    "steiner", "tristar", "mounted memories", "coa", "certificate of authenticity",
    "witnessed", "in-person", "in person", "cut signature", "cut auto", "index card",
    "3x5", "multi-signed", "team-signed", "team signed",
];

const SEALED_KEYWORDS: &[&str] = &[
    "sealed", "factory sealed", "unopened", "wax box", "wax pack", "hobby box",
    "retail box", "blaster box", "case", "sealed case", "master case", "pack",
    "foil pack", "cello pack", "rack pack", "jumbo pack", "fat pack", "hanger box",
    "mega box", "value box", "bbce", "fasc",
];

/// Phrases that make an item memorabilia even when card words are present.
const MEMORABILIA_OVERRIDE: &[&str] = &[
    "game-worn", "game worn", "game-used jersey", "game-used helmet", "game-used bat",
    "game-used ball", "game-used equipment", "player-worn", "match-worn", "match worn",
    "trophy", "championship ring", "original photo", "wire photo", "press photo",
    "full ticket", "ticket stub", "game program", "bobblehead", "figurine", "statue",
];

static NUMBERED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#/]\s*\d{1,4}\b").expect("valid numbered regex"));

fn count_hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| text.contains(*kw)).count()
}

/// Layered classification: graded items are cards, then sealed product, then
/// memorabilia overrides, then keyword scores.
pub fn detect_item_type(
    title: &str,
    description: Option<&str>,
    category: Option<&str>,
    grading_company: Option<&str>,
) -> ItemType {
    if grading_company.is_some_and(|g| !g.trim().is_empty()) {
        return ItemType::Card;
    }

    let title = title.to_lowercase();
    let combined = format!(
        "{} {} {}",
        title,
        description.unwrap_or_default().to_lowercase(),
        category.unwrap_or_default().to_lowercase()
    );
    let overridden = MEMORABILIA_OVERRIDE.iter().any(|kw| combined.contains(kw));

    if !overridden && GRADING_COMPANIES.iter().any(|g| title.contains(g)) {
        return ItemType::Card;
    }

    let sealed = count_hits(&combined, SEALED_KEYWORDS);
    let boxed = ["box", "pack", "case"].iter().any(|w| title.contains(w));
    if sealed >= 2 || (sealed >= 1 && boxed) {
        return ItemType::Sealed;
    }

    if overridden {
        return ItemType::Memorabilia;
    }

    let mut card = count_hits(&combined, CARD_INDICATORS);
    if NUMBERED_RE.is_match(&title) {
        card += 2;
    }
    let memo = count_hits(&combined, MEMORABILIA_KEYWORDS);
    let auto = count_hits(&combined, AUTOGRAPH_KEYWORDS);

    if card >= 3 {
        return ItemType::Card;
    }
    if memo >= 3 {
        return ItemType::Memorabilia;
    }
    if card >= 2 && card > memo {
        return ItemType::Card;
    }
    if memo >= 2 && memo > card {
        return if auto >= 2 {
            ItemType::Autograph
        } else {
            ItemType::Memorabilia
        };
    }
    if auto >= 2 && card < 2 && memo < 2 {
        return ItemType::Autograph;
    }

    match (card, memo, auto) {
        (c, _, _) if c >= 1 => ItemType::Card,
        (_, m, _) if m >= 1 => ItemType::Memorabilia,
        (_, _, a) if a >= 1 => ItemType::Autograph,
        _ => ItemType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn graded_items_are_cards() {
        assert_eq!(detect_item_type("Anything", None, None, Some("PSA")), ItemType::Card);
        assert_eq!(
            detect_item_type("1952 Topps Mickey Mantle SGC 3", None, None, None),
            ItemType::Card
        );
    }

    #[test]
    fn sealed_product() {
        assert_eq!(
            detect_item_type("2023 Topps Chrome Hobby Box Factory Sealed", None, None, None),
            ItemType::Sealed
        );
    }

    #[test]
    fn override_beats_grader_mention() {
        assert_eq!(
            detect_item_type("Derek Jeter Game Worn Jersey PSA/DNA", None, None, None),
            ItemType::Memorabilia
        );
    }

    #[test]
    fn signed_memorabilia_is_autograph() {
        assert_eq!(
            detect_item_type(
                "Tom Brady Signed Framed Photo",
                Some("Fanatics Authenticated"),
                None,
                None
            ),
            ItemType::Autograph
        );
    }

    #[test]
    fn nothing_recognised_is_other() {
        assert_eq!(detect_item_type("Vintage Lamp", None, None, None), ItemType::Other);
    }
}
