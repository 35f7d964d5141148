use serde::Serialize;

/// One post scraped from the timeline. Built once per visible card,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Tweet {
    pub author: String,
    pub text: String,
    pub likes: u64,
    pub retweets: u64,
    pub replies: u64,
    pub views: u64,
    pub url: String,
}

impl Tweet {
    /// Heuristic virality score. Retweets amplify reach far more than
    /// likes, so they get double weight.
    pub fn viral_score(&self) -> u64 {
        self.likes + 2 * self.retweets
    }
}

/// Return the tweet with the highest viral score, or `None` for an empty
/// batch. Ties go to the earliest tweet in collection order.
pub fn find_most_viral(tweets: &[Tweet]) -> Option<&Tweet> {
    let mut best: Option<&Tweet> = None;
    for t in tweets {
        match best {
            Some(b) if t.viral_score() <= b.viral_score() => {}
            _ => best = Some(t),
        }
    }
    best
}

/// Parse a human-formatted counter ("1.2K", "15", "3,402", "2.5M") into an
/// integer. Anything unparseable, including an absent counter, is 0.
pub fn parse_count(raw: &str) -> u64 {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return 0;
    }

    let digits: String = cleaned
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let number: f64 = match digits.parse() {
        Ok(n) => n,
        Err(_) => return 0,
    };

    let mult = match cleaned[digits.len()..].chars().next() {
        Some('k') | Some('K') => 1_000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some('b') | Some('B') => 1_000_000_000.0,
        _ => 1.0,
    };

    (number * mult) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tweet(author: &str, likes: u64, retweets: u64, url: &str) -> Tweet {
        Tweet {
            author: author.to_string(),
            text: format!("post by {author}"),
            likes,
            retweets,
            replies: 0,
            views: 0,
            url: url.to_string(),
        }
    }

    #[test]
    fn parses_plain_numbers() {
        assert_eq!(parse_count("15"), 15);
        assert_eq!(parse_count("3,402"), 3402);
        assert_eq!(parse_count("  7 "), 7);
    }

    #[test]
    fn parses_suffixed_counts() {
        assert_eq!(parse_count("1.2K"), 1200);
        assert_eq!(parse_count("2.5M"), 2_500_000);
        assert_eq!(parse_count("3b"), 3_000_000_000);
        assert_eq!(parse_count("4k"), 4000);
    }

    #[test]
    fn garbage_and_empty_parse_to_zero() {
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("   "), 0);
        assert_eq!(parse_count("views"), 0);
        assert_eq!(parse_count("."), 0);
    }

    #[test]
    fn viral_score_weights_retweets_double() {
        assert_eq!(tweet("a", 10, 5, "/a/status/1").viral_score(), 20);
        assert_eq!(tweet("a", 0, 0, "/a/status/1").viral_score(), 0);
    }

    #[test]
    fn most_viral_empty_is_none() {
        assert!(find_most_viral(&[]).is_none());
    }

    #[test]
    fn most_viral_prefers_leftmost_on_tie() {
        let batch = vec![
            tweet("first", 10, 5, "/first/status/1"),
            tweet("second", 20, 0, "/second/status/2"),
            tweet("third", 0, 15, "/third/status/3"),
        ];
        // first and second both score 20, third scores 30
        let top = find_most_viral(&batch).unwrap();
        assert_eq!(top.author, "third");

        let tied = &batch[..2];
        assert_eq!(find_most_viral(tied).unwrap().author, "first");
    }
}
