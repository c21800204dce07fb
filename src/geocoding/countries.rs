//! Built-in country table and location aliases

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// `(alpha-2, alpha-3, English name)`
const COUNTRIES: &[(&str, &str, &str)] = &[
    ("AE", "ARE", "United Arab Emirates"),
    ("AR", "ARG", "Argentina"),
    ("AT", "AUT", "Austria"),
    ("AU", "AUS", "Australia"),
    ("BD", "BGD", "Bangladesh"),
    ("BE", "BEL", "Belgium"),
    ("BG", "BGR", "Bulgaria"),
    ("BR", "BRA", "Brazil"),
    ("BY", "BLR", "Belarus"),
    ("CA", "CAN", "Canada"),
    ("CH", "CHE", "Switzerland"),
    ("CL", "CHL", "Chile"),
    ("CN", "CHN", "China"),
    ("CO", "COL", "Colombia"),
    ("CZ", "CZE", "Czechia"),
    ("DE", "DEU", "Germany"),
    ("DK", "DNK", "Denmark"),
    ("EE", "EST", "Estonia"),
    ("EG", "EGY", "Egypt"),
    ("ES", "ESP", "Spain"),
    ("FI", "FIN", "Finland"),
    ("FR", "FRA", "France"),
    ("GB", "GBR", "United Kingdom"),
    ("GR", "GRC", "Greece"),
    ("HK", "HKG", "Hong Kong"),
    ("HR", "HRV", "Croatia"),
    ("HU", "HUN", "Hungary"),
    ("ID", "IDN", "Indonesia"),
    ("IE", "IRL", "Ireland"),
    ("IL", "ISR", "Israel"),
    ("IN", "IND", "India"),
    ("IR", "IRN", "Iran"),
    ("IT", "ITA", "Italy"),
    ("JP", "JPN", "Japan"),
    ("KE", "KEN", "Kenya"),
    ("KP", "PRK", "North Korea"),
    ("KR", "KOR", "South Korea"),
    ("LT", "LTU", "Lithuania"),
    ("LV", "LVA", "Latvia"),
    ("MX", "MEX", "Mexico"),
    ("MY", "MYS", "Malaysia"),
    ("NG", "NGA", "Nigeria"),
    ("NL", "NLD", "Netherlands"),
    ("NO", "NOR", "Norway"),
    ("NZ", "NZL", "New Zealand"),
    ("PE", "PER", "Peru"),
    ("PH", "PHL", "Philippines"),
    ("PK", "PAK", "Pakistan"),
    ("PL", "POL", "Poland"),
    ("PT", "PRT", "Portugal"),
    ("RO", "ROU", "Romania"),
    ("RS", "SRB", "Serbia"),
    ("RU", "RUS", "Russia"),
    ("SA", "SAU", "Saudi Arabia"),
    ("SE", "SWE", "Sweden"),
    ("SG", "SGP", "Singapore"),
    ("SK", "SVK", "Slovakia"),
    ("TH", "THA", "Thailand"),
    ("TR", "TUR", "Turkey"),
    ("TW", "TWN", "Taiwan"),
    ("UA", "UKR", "Ukraine"),
    ("US", "USA", "United States"),
    ("VE", "VEN", "Venezuela"),
    ("VN", "VNM", "Vietnam"),
    ("ZA", "ZAF", "South Africa"),
];

/// Local names, abbreviations and major cities
const ALIASES: &[(&str, &str)] = &[
    ("usa", "US"),
    ("u.s.", "US"),
    ("u.s.a.", "US"),
    ("united states of america", "US"),
    ("america", "US"),
    ("uk", "GB"),
    ("great britain", "GB"),
    ("england", "GB"),
    ("scotland", "GB"),
    ("wales", "GB"),
    ("deutschland", "DE"),
    ("españa", "ES"),
    ("espana", "ES"),
    ("italia", "IT"),
    ("brasil", "BR"),
    ("méxico", "MX"),
    ("holland", "NL"),
    ("the netherlands", "NL"),
    ("schweiz", "CH"),
    ("suisse", "CH"),
    ("sverige", "SE"),
    ("norge", "NO"),
    ("danmark", "DK"),
    ("suomi", "FI"),
    ("österreich", "AT"),
    ("osterreich", "AT"),
    ("belgique", "BE"),
    ("belgië", "BE"),
    ("belgie", "BE"),
    ("ελλάδα", "GR"),
    ("ellada", "GR"),
    ("éire", "IE"),
    ("eire", "IE"),
    ("korea", "KR"),
    ("türkiye", "TR"),
    ("turkiye", "TR"),
    ("czech republic", "CZ"),
    ("مصر", "EG"),
    ("uae", "AE"),
    ("المملكة العربية السعودية", "SA"),
    ("الإمارات العربية المتحدة", "AE"),
    ("پاکستان", "PK"),
    ("বাংলাদেশ", "BD"),
    ("việt nam", "VN"),
    ("ประเทศไทย", "TH"),
    ("pilipinas", "PH"),
    ("polska", "PL"),
    ("україна", "UA"),
    ("россия", "RU"),
    ("new york", "US"),
    ("nyc", "US"),
    ("san francisco", "US"),
    ("seattle", "US"),
    ("california", "US"),
    ("texas", "US"),
    ("florida", "US"),
    ("london", "GB"),
    ("paris", "FR"),
    ("berlin", "DE"),
    ("munich", "DE"),
    ("münchen", "DE"),
    ("hamburg", "DE"),
    ("madrid", "ES"),
    ("barcelona", "ES"),
    ("rome", "IT"),
    ("roma", "IT"),
    ("milan", "IT"),
    ("amsterdam", "NL"),
    ("zurich", "CH"),
    ("zürich", "CH"),
    ("stockholm", "SE"),
    ("vienna", "AT"),
    ("wien", "AT"),
    ("tokyo", "JP"),
    ("東京", "JP"),
    ("beijing", "CN"),
    ("北京", "CN"),
    ("shanghai", "CN"),
    ("上海", "CN"),
    ("shenzhen", "CN"),
    ("hangzhou", "CN"),
    ("seoul", "KR"),
    ("sydney", "AU"),
    ("melbourne", "AU"),
    ("mumbai", "IN"),
    ("मुंबई", "IN"),
    ("bangalore", "IN"),
    ("bengaluru", "IN"),
    ("toronto", "CA"),
    ("vancouver", "CA"),
    ("montreal", "CA"),
    ("são paulo", "BR"),
    ("sao paulo", "BR"),
    ("rio de janeiro", "BR"),
    ("moscow", "RU"),
    ("москва", "RU"),
    ("moskva", "RU"),
    ("st. petersburg", "RU"),
    ("saint petersburg", "RU"),
    ("санкт-петербург", "RU"),
    ("sankt-peterburg", "RU"),
];

/// Every known spelling (aliases, names, alpha-2, alpha-3) to alpha-2
static LOOKUP: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (alpha2, alpha3, name) in COUNTRIES {
        map.insert(alpha2.to_lowercase(), *alpha2);
        map.insert(alpha3.to_lowercase(), *alpha2);
        map.insert(name.to_lowercase(), *alpha2);
    }
    for (alias, alpha2) in ALIASES {
        map.insert((*alias).to_string(), *alpha2);
    }
    map
});

static NAMES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| COUNTRIES.iter().map(|(alpha2, _, name)| (*alpha2, *name)).collect());

/// English name for an alpha-2 code
pub fn country_name(alpha2: &str) -> Option<&'static str> {
    NAMES.get(alpha2.to_uppercase().as_str()).copied()
}

/// Resolve normalised location text to an alpha-2 code without a provider.
///
/// The whole text is tried first, then its last comma-separated segment
/// ("Berlin, DE", "Lyon, France"), then its first one ("Berlin, Mitte").
/// Two-letter codes only count as a whole segment, never as a loose word.
pub fn lookup_country(normalized: &str) -> Option<&'static str> {
    if normalized.is_empty() {
        return None;
    }
    if let Some(code) = LOOKUP.get(normalized) {
        return Some(*code);
    }

    let segments: Vec<&str> = normalized
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return None;
    }
    segments
        .last()
        .and_then(|last| LOOKUP.get(*last))
        .or_else(|| segments.first().and_then(|first| LOOKUP.get(*first)))
        .copied()
}
