use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStatus {
    Live,
    NotActive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedView {
    pub index: u32,
    pub name: String,
    pub title: String,
    pub active: bool,
    pub running: bool,
    pub stable_running: bool,
    pub status: TileStatus,
    pub connection_token: String,
    /// Present only while the feed holds a stream slot.
    pub stream_url: Option<String>,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WallSnapshot {
    pub feeds: Vec<FeedView>,
    pub allocated: Vec<u32>,
    pub visible: Vec<u32>,
    pub ramp_ceiling: usize,
    pub max_slots: usize,
    pub capacity: usize,
    pub fullscreen: Option<u32>,
    pub error: Option<String>,
    pub torn_down: bool,
}

impl WallSnapshot {
    pub fn feed(&self, index: u32) -> Option<&FeedView> {
        self.feeds.iter().find(|feed| feed.index == index)
    }

    /// True while `token` is the live connection token of a feed holding a slot.
    pub fn holds_token(&self, index: u32, token: &str) -> bool {
        self.feed(index)
            .is_some_and(|feed| feed.stream_url.is_some() && feed.connection_token == token)
    }
}
