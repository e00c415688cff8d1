use crate::model::Sport;
use once_cell::sync::Lazy;
use regex::Regex;

/// Any match here vetoes sport classification. Ambiguous everyday words and
/// names shared with athletes or teams are left out on purpose, since one hit
/// is enough to force OTHER.
const NON_SPORT_KEYWORDS: &[&str] = &[
    // Pokemon
    "pokemon", "pokémon", "pikachu", "charizard", "mewtwo", "blastoise", "venusaur",
    "bulbasaur", "squirtle", "charmander", "eevee", "jigglypuff", "snorlax", "gengar",
    "dragonite", "lugia", "rayquaza", "gyarados", "umbreon", "lucario", "greninja",
    "mimikyu", "sylveon", "gardevoir", "pokemon tcg", "shadowless", "neo genesis",
    "scarlet violet", "obsidian flames", "crown zenith", "silver tempest",
    // Magic: The Gathering
    "magic the gathering", "magic: the gathering", "mtg", "black lotus", "planeswalker",
    "mox pearl", "mox sapphire", "mox jet", "mox ruby", "mox emerald", "ancestral recall",
    "timetwister", "underground sea", "volcanic island",
    // Yu-Gi-Oh
    "yu-gi-oh", "yugioh", "yu gi oh", "blue-eyes white dragon", "blue eyes white dragon",
    "dark magician", "exodia", "red-eyes black dragon", "slifer the sky dragon",
    "obelisk the tormentor", "winged dragon of ra", "duel monsters", "seto kaiba",
    // Other TCGs
    "flesh and blood", "disney lorcana", "lorcana", "one piece card game", "one piece tcg",
    "digimon", "cardfight vanguard", "weiss schwarz", "force of will", "metazoo",
    "star wars unlimited", "union arena", "keyforge", "netrunner",
    // Star Wars
    "star wars", "starwars", "darth vader", "luke skywalker", "han solo", "yoda",
    "princess leia", "chewbacca", "obi-wan kenobi", "obi wan", "anakin skywalker",
    "kylo ren", "mandalorian", "grogu", "baby yoda", "boba fett", "ahsoka",
    "stormtrooper", "death star", "millennium falcon", "lightsaber", "clone wars",
    // Marvel / DC
    "marvel comics", "spider-man", "spiderman", "iron man", "captain america", "avengers",
    "x-men", "wolverine", "deadpool", "thanos", "black panther", "guardians of the galaxy",
    "fantastic four", "silver surfer", "marvel masterpieces", "marvel universe",
    "dc comics", "batman", "superman", "wonder woman", "green lantern", "justice league",
    "harley quinn", "lex luthor",
    // Disney / Harry Potter / Lord of the Rings
    "disney", "mickey mouse", "donald duck", "lion king", "toy story", "pixar",
    "harry potter", "hogwarts", "hermione granger", "dumbledore", "voldemort",
    "lord of the rings", "middle-earth", "gandalf", "frodo baggins",
    // Wrestling
    "wwe", "wwf", "wrestling", "wrestlemania", "royal rumble", "summerslam", "smackdown",
    "hulk hogan", "stone cold steve austin", "john cena", "undertaker", "ric flair",
    "randy savage", "macho man", "ultimate warrior", "andre the giant", "roman reigns",
    "aew", "wcw", "lucha libre",
    // Other franchises and non-sport sets
    "game of thrones", "stranger things", "jurassic park", "ghostbusters", "star trek",
    "teenage mutant ninja turtles", "tmnt", "power rangers", "transformers",
    "optimus prime", "dragon ball", "naruto", "sailor moon", "garbage pail kids",
    "wacky packages", "mars attacks", "non-sport", "nonsport", "non sport",
];

const BASKETBALL: &[&str] = &[
    "nba", "wnba", "ncaa basketball", "nba finals", "basketball", "slam dunk",
    "triple double", "lakers", "celtics", "bulls", "warriors", "knicks", "mavericks",
    "rockets", "clippers", "76ers", "sixers", "pelicans", "grizzlies", "timberwolves",
    "nuggets", "trail blazers", "cavaliers", "pistons", "pacers", "raptors", "wizards",
    "michael jordan", "lebron james", "kobe bryant", "stephen curry", "kevin durant",
    "giannis", "antetokounmpo", "luka doncic", "nikola jokic", "joel embiid",
    "jayson tatum", "ja morant", "zion williamson", "lamelo ball", "anthony edwards",
    "victor wembanyama", "wembanyama", "chet holmgren", "paolo banchero", "tyrese haliburton",
    "shai gilgeous-alexander", "devin booker", "damian lillard", "cooper flagg",
    "caitlin clark", "larry bird", "magic johnson", "shaquille o'neal", "kareem abdul-jabbar",
    "wilt chamberlain", "bill russell", "tim duncan", "dirk nowitzki", "allen iverson",
    "dwyane wade", "hakeem olajuwon", "scottie pippen", "dennis rodman",
];

const BASEBALL: &[&str] = &[
    "mlb", "major league baseball", "minor league", "baseball", "home run", "pitcher",
    "yankees", "red sox", "dodgers", "cubs", "mets", "braves", "astros", "phillies",
    "padres", "mariners", "orioles", "white sox", "athletics", "royals",
    "shohei ohtani", "ohtani", "mike trout", "mookie betts", "aaron judge", "juan soto",
    "ronald acuna", "freddie freeman", "bryce harper", "pete alonso", "fernando tatis jr",
    "vladimir guerrero jr", "julio rodriguez", "bobby witt jr", "gunnar henderson",
    "elly de la cruz", "jackson holliday", "paul skenes", "corbin carroll",
    "mickey mantle", "babe ruth", "lou gehrig", "willie mays", "hank aaron",
    "jackie robinson", "roberto clemente", "ted williams", "ken griffey jr", "derek jeter",
    "honus wagner", "ty cobb", "sandy koufax", "nolan ryan", "cal ripken",
];

const FOOTBALL: &[&str] = &[
    "nfl", "ncaa football", "college football", "super bowl", "quarterback", "touchdown",
    "chiefs", "eagles", "cowboys", "49ers", "packers", "patriots", "ravens", "steelers",
    "bengals", "broncos", "raiders", "chargers", "seahawks", "buccaneers", "vikings",
    "commanders",
    "tom brady", "patrick mahomes", "joe montana", "peyton manning", "aaron rodgers",
    "brett favre", "dan marino", "john elway", "joe burrow", "josh allen", "jalen hurts",
    "lamar jackson", "justin herbert", "trevor lawrence", "jerry rice", "randy moss",
    "justin jefferson", "ja'marr chase", "cj stroud", "c.j. stroud", "brock purdy",
    "caleb williams", "jayden daniels", "drake maye", "marvin harrison jr",
    "malik nabers", "bijan robinson", "jahmyr gibbs", "puka nacua", "brock bowers",
    "micah parsons", "walter payton", "barry sanders", "emmitt smith", "jim brown",
    "lawrence taylor", "ray lewis",
];

const HOCKEY: &[&str] = &[
    "nhl", "national hockey league", "hockey", "ice hockey", "stanley cup",
    "bruins", "canadiens", "maple leafs", "blackhawks", "red wings", "penguins",
    "flyers", "oilers", "avalanche", "golden knights", "kraken", "canucks",
    "hurricanes", "sabres", "islanders", "blue jackets",
    "wayne gretzky", "mario lemieux", "gordie howe", "bobby orr", "sidney crosby",
    "alex ovechkin", "connor mcdavid", "connor bedard", "auston matthews",
    "nathan mackinnon", "leon draisaitl", "cale makar", "nikita kucherov",
    "steve yzerman", "joe sakic", "patrick roy", "mark messier", "jaromir jagr",
    "teemu selanne", "martin brodeur", "dominik hasek",
];

const SOCCER: &[&str] = &[
    "fifa", "premier league", "la liga", "bundesliga", "serie a", "champions league",
    "mls", "copa america", "ligue 1", "europa league", "soccer", "futbol",
    "manchester united", "real madrid", "barcelona", "bayern munich", "liverpool",
    "chelsea", "arsenal", "manchester city", "paris saint-germain", "juventus",
    "inter milan", "ac milan", "borussia dortmund", "tottenham",
    "lionel messi", "messi", "cristiano ronaldo", "kylian mbappe", "mbappe",
    "erling haaland", "haaland", "neymar", "jude bellingham", "vinicius jr",
    "lamine yamal", "pele", "diego maradona", "johan cruyff", "zinedine zidane",
    "ronaldinho", "thierry henry", "david beckham", "wayne rooney", "steven gerrard",
];

const GOLF: &[&str] = &[
    "pga", "lpga", "pga tour", "liv golf", "ryder cup", "presidents cup",
    "pga championship", "british open", "us open golf", "golf", "golfer",
    "tiger woods", "jack nicklaus", "arnold palmer", "gary player", "ben hogan",
    "sam snead", "bobby jones", "lee trevino", "tom watson", "seve ballesteros",
    "phil mickelson", "rory mcilroy", "jordan spieth", "scottie scheffler",
    "brooks koepka", "bryson dechambeau", "jon rahm", "nelly korda",
];

const BOXING: &[&str] = &[
    "wba", "wbc", "ibf", "wbo", "ufc", "bellator", "boxing", "boxer", "heavyweight",
    "knockout", "mma", "mixed martial arts", "ultimate fighting",
    "muhammad ali", "cassius clay", "mike tyson", "sugar ray robinson",
    "sugar ray leonard", "joe louis", "rocky marciano", "jack dempsey", "joe frazier",
    "george foreman", "marvin hagler", "thomas hearns", "roberto duran",
    "evander holyfield", "lennox lewis", "oscar de la hoya", "floyd mayweather",
    "manny pacquiao", "canelo alvarez", "tyson fury", "conor mcgregor", "jon jones",
];

const RACING: &[&str] = &[
    "nascar", "formula 1", "f1", "indycar", "indy 500", "daytona", "le mans", "motogp",
    "nhra", "drag racing", "formula e", "supercross", "racing", "race car",
    "motorsport", "auto racing",
    "dale earnhardt", "dale earnhardt jr", "richard petty", "jeff gordon",
    "jimmie johnson", "tony stewart", "kyle busch", "kevin harvick", "chase elliott",
    "joey logano", "denny hamlin", "kyle larson", "lewis hamilton", "max verstappen",
    "michael schumacher", "ayrton senna", "charles leclerc", "lando norris",
    "fernando alonso", "mario andretti", "aj foyt",
];

const SPORT_KEYWORDS: &[(Sport, &[&str])] = &[
    (Sport::Basketball, BASKETBALL),
    (Sport::Baseball, BASEBALL),
    (Sport::Football, FOOTBALL),
    (Sport::Hockey, HOCKEY),
    (Sport::Soccer, SOCCER),
    (Sport::Golf, GOLF),
    (Sport::Boxing, BOXING),
    (Sport::Racing, RACING),
];

/// First match wins, weighted `len + 10`.
const MANUFACTURER_SPORT_HINTS: &[(&str, Sport)] = &[
    ("bowman", Sport::Baseball),
    ("topps chrome baseball", Sport::Baseball),
    ("topps baseball", Sport::Baseball),
    ("topps series 1", Sport::Baseball),
    ("topps series 2", Sport::Baseball),
    ("topps update", Sport::Baseball),
    ("gypsy queen", Sport::Baseball),
    ("allen & ginter", Sport::Baseball),
    ("allen and ginter", Sport::Baseball),
    ("stadium club baseball", Sport::Baseball),
    ("upper deck hockey", Sport::Hockey),
    ("o-pee-chee", Sport::Hockey),
    ("opc hockey", Sport::Hockey),
    ("sp authentic hockey", Sport::Hockey),
    ("the cup hockey", Sport::Hockey),
    ("young guns", Sport::Hockey),
    ("hoops basketball", Sport::Basketball),
    ("nba hoops", Sport::Basketball),
    ("court kings", Sport::Basketball),
    ("crown royale basketball", Sport::Basketball),
    ("score football", Sport::Football),
    ("playoff contenders", Sport::Football),
    ("panini contenders football", Sport::Football),
];

/// Set names weighted `len + 15`; the heaviest matching set wins.
const SET_HINTS: &[(Sport, &[&str])] = &[
    (
        Sport::Basketball,
        &[
            "national treasures basketball", "prizm basketball", "select basketball",
            "flawless basketball", "immaculate basketball", "noir basketball", "one and one",
            "eminence", "origins basketball", "contenders optic basketball",
            "mosaic basketball", "hoops", "donruss optic basketball", "spectra basketball",
            "chronicles basketball", "court kings", "crown royale basketball",
            "absolute basketball", "certified basketball",
        ],
    ),
    (
        Sport::Football,
        &[
            "national treasures football", "prizm football", "select football",
            "contenders football", "certified football", "plates & patches",
            "limited football", "obsidian football", "mosaic football", "donruss football",
            "chronicles football", "absolute football", "origins football",
        ],
    ),
    (
        Sport::Baseball,
        &[
            "topps chrome", "bowman", "bowman chrome", "bowman draft", "bowman 1st",
            "topps series", "topps update", "stadium club", "gypsy queen", "allen & ginter",
            "allen and ginter", "topps finest", "topps gold label", "topps triple threads",
            "museum collection baseball", "tier one", "five star", "diamond icons",
        ],
    ),
    (
        Sport::Hockey,
        &[
            "sp authentic", "sp game used", "the cup", "ultimate collection", "artifacts",
            "trilogy", "exquisite hockey", "black diamond", "upper deck series",
            "o-pee-chee", "opc", "synergy", "mvp hockey", "upper deck hockey", "young guns",
            "ud canvas",
        ],
    ),
    (
        Sport::Soccer,
        &[
            "topps chrome soccer", "topps finest soccer", "merlin", "match attax",
            "topps ucl", "topps bundesliga", "topps mls", "prizm soccer", "select soccer",
            "national treasures soccer", "immaculate soccer", "flawless soccer",
            "obsidian soccer", "mosaic soccer", "donruss soccer", "chronicles soccer",
            "world cup", "adrenalyn",
        ],
    ),
];

const STRONG_KEYWORD_SCORE: i32 = 8;

static SPLIT_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(19|20)\d{2}-(0\d|1\d|2[0-5])\s+").expect("valid split year regex"));

static TOPPS_YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(19|20)\d{2}\s+(topps|bowman)").expect("valid topps year regex")
});

/// Word-boundary substring test. Boundaries are only enforced on sides where
/// the needle itself starts or ends with a word character.
pub(crate) fn contains_word(haystack: &str, needle: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let guard_start = needle.chars().next().is_some_and(is_word);
    let guard_end = needle.chars().next_back().is_some_and(is_word);

    haystack.match_indices(needle).any(|(at, _)| {
        let before_ok = !guard_start
            || haystack[..at]
                .chars()
                .next_back()
                .map_or(true, |c| !is_word(c));
        let after_ok = !guard_end
            || haystack[at + needle.len()..]
                .chars()
                .next()
                .map_or(true, |c| !is_word(c));
        before_ok && after_ok
    })
}

fn keyword_score(text: &str, keyword: &str) -> i32 {
    if contains_word(text, keyword) {
        keyword.chars().count() as i32
    } else {
        0
    }
}

fn best_of(scores: &[i32; 9]) -> (Sport, i32) {
    let mut best = (Sport::Other, 0);
    for sport in Sport::ALL {
        let score = scores[sport.index()];
        if score > best.1 {
            best = (sport, score);
        }
    }
    best
}

fn manufacturer_hint(text: &str) -> Option<(Sport, i32)> {
    let mut hint = MANUFACTURER_SPORT_HINTS
        .iter()
        .find(|(phrase, _)| contains_word(text, phrase))
        .map(|(phrase, sport)| (*sport, phrase.chars().count() as i32 + 10));

    for (sport, sets) in SET_HINTS {
        for set in sets.iter().filter(|set| contains_word(text, set)) {
            let weight = set.chars().count() as i32 + 15;
            if hint.map_or(true, |(_, current)| current < weight) {
                hint = Some((*sport, weight));
            }
        }
    }
    hint
}

/// Classifies a listing into a sport. Any non-sport keyword vetoes outright;
/// otherwise keyword scores decide, with year and manufacturer hints only
/// able to tip weak matches.
pub fn detect_sport(title: &str, description: Option<&str>, category: Option<&str>) -> Sport {
    if title.trim().is_empty() {
        return Sport::Other;
    }

    let mut text = title.to_lowercase();
    for extra in [description, category].into_iter().flatten() {
        text.push(' ');
        text.push_str(&extra.to_lowercase());
    }

    if NON_SPORT_KEYWORDS.iter().any(|kw| contains_word(&text, kw)) {
        return Sport::Other;
    }

    let mut scores = [0i32; 9];
    for (sport, keywords) in SPORT_KEYWORDS {
        scores[sport.index()] = keywords.iter().map(|kw| keyword_score(&text, kw)).sum();
    }

    let (keyword_sport, keyword_best) = best_of(&scores);

    if keyword_best < STRONG_KEYWORD_SCORE {
        if TOPPS_YEAR_RE.is_match(title) {
            scores[Sport::Baseball.index()] += 25;
        } else if SPLIT_YEAR_RE.is_match(title) {
            scores[Sport::Basketball.index()] += 15;
            scores[Sport::Hockey.index()] += 15;
        }
    }

    if let Some((hint_sport, weight)) = manufacturer_hint(&text) {
        if keyword_best < STRONG_KEYWORD_SCORE || hint_sport == keyword_sport {
            scores[hint_sport.index()] += weight;
        }
    }

    best_of(&scores).0
}
