//! Built-in topic bundles offered as starter subscriptions.

/// A named bundle of feeds.
#[derive(Debug, Clone, Copy)]
pub struct Topic {
    pub name: &'static str,
    pub sources: &'static [&'static str],
}

pub const TOPICS: &[Topic] = &[
    Topic {
        name: "cars",
        sources: &[
            "https://www.autoblog.com/rss.xml",
            "https://www.autocar.co.uk/rss",
            "https://www.carbodydesign.com/feed/",
        ],
    },
    Topic {
        name: "food",
        sources: &[
            "https://cnz.to/feed/",
            "https://www.youtube.com/feeds/videos.xml?user=bgfilms",
            "https://www.101cookbooks.com/feed",
        ],
    },
    Topic {
        name: "gaming",
        sources: &[
            "https://www.escapistmagazine.com/v2/feed/",
            "https://www.eurogamer.net/?format=rss",
            "http://feeds.ign.com/ign/all",
        ],
    },
    Topic {
        name: "history",
        sources: &[
            "https://americanhistory.si.edu/blog/feed",
            "http://www.historynet.com/feed",
            "https://www.historyisnowmagazine.com/blog?format=RSS",
        ],
    },
    Topic {
        name: "movies",
        sources: &[
            "https://feeds2.feedburner.com/slashfilm",
            "https://www.aintitcool.com/node/feed/",
            "https://www.comingsoon.net/feed",
        ],
    },
    Topic {
        name: "music",
        sources: &[
            "https://www.billboard.com/articles/rss.xml",
            "http://consequenceofsound.net/feed",
            "https://edm.com/.rss/full/",
        ],
    },
    Topic {
        name: "science",
        sources: &[
            "http://feeds.bbci.co.uk/news/science_and_environment/rss.xml",
            "https://www.sciencedaily.com/rss/all.xml",
            "http://rss.sciam.com/sciam/60secsciencepodcast",
        ],
    },
    Topic {
        name: "sport",
        sources: &[
            "http://feeds.bbci.co.uk/sport/rss.xml",
            "https://www.reddit.com/r/sports.rss",
            "http://feeds.skynews.com/feeds/rss/sports.xml",
        ],
    },
    Topic {
        name: "technology",
        sources: &[
            "http://feeds.arstechnica.com/arstechnica/index",
            "https://www.youtube.com/feeds/videos.xml?user=LinusTechTips",
            "http://feeds.feedburner.com/TechCrunch",
        ],
    },
    Topic {
        name: "travel",
        sources: &[
            "https://www.atlasobscura.com/feeds/latest",
            "https://www.livelifetravel.world/feed/",
            "https://www.lonelyplanet.com/news/feed/atom/",
        ],
    },
    Topic {
        name: "politics",
        sources: &[
            "http://feeds.bbci.co.uk/news/world/rss.xml",
            "http://rss.cnn.com/rss/edition_world.rss",
            "https://www.reddit.com/r/worldnews/.rss",
        ],
    },
    Topic {
        name: "czech_news",
        sources: &[
            "https://www.irozhlas.cz/rss/irozhlas",
            "https://ct24.ceskatelevize.cz/rss",
        ],
    },
    Topic {
        name: "french_news",
        sources: &["https://www.lemonde.fr/rss/plus-lus.xml"],
    },
    Topic {
        name: "german_news",
        sources: &["https://rss.sueddeutsche.de/rss/Topthemen"],
    },
    Topic {
        name: "italian_news",
        sources: &[
            "https://www.repubblica.it/rss/homepage/rss2.0.xml",
            "https://xml2.corriereobjects.it/rss/homepage.xml",
        ],
    },
    Topic {
        name: "polish_news",
        sources: &["https://tvn24.pl/najnowsze.xml"],
    },
    Topic {
        name: "japanese_news",
        sources: &["https://www.nhk.or.jp/rss/news/cat0.xml"],
    },
];

pub fn find_topic(name: &str) -> Option<&'static Topic> {
    TOPICS.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedSource;

    #[test]
    fn every_topic_source_is_a_valid_feed() {
        for topic in TOPICS {
            assert!(!topic.sources.is_empty(), "{}", topic.name);
            for url in topic.sources {
                let feed = FeedSource::new(url).unwrap();
                assert_eq!(feed.url, *url);
            }
        }
    }

    #[test]
    fn topics_are_looked_up_by_name() {
        assert_eq!(find_topic("science").unwrap().sources.len(), 3);
        assert!(find_topic("knitting").is_none());
    }
}
