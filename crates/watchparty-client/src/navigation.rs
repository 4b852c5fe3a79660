//! Navigation context: where the `room` parameter lives.

use parking_lot::Mutex;
use url::Url;
use watchparty_core::RoomId;

/// Query parameter carrying the room token.
pub const ROOM_PARAM: &str = "room";

pub trait NavigationContext: Send + Sync {
    /// Room token in the current location, if any.
    fn room_param(&self) -> Option<RoomId>;

    /// Add, replace or (with `None`) strip the room token.
    fn set_room_param(&self, room: Option<&RoomId>);

    fn current_url(&self) -> Url;
}

/// Copy of `url` with the room parameter set to `room`. Other query
/// parameters keep their order.
pub fn with_room_param(url: &Url, room: Option<&RoomId>) -> Url {
    let mut url = url.clone();
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| *key != ROOM_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if retained.is_empty() && room.is_none() {
        url.set_query(None);
        return url;
    }

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(retained.iter());
        if let Some(room) = room {
            pairs.append_pair(ROOM_PARAM, room.as_str());
        }
    }
    url
}

/// Navigation state held as a [`Url`].
#[derive(Debug)]
pub struct UrlNavigation {
    url: Mutex<Url>,
}

impl UrlNavigation {
    pub fn new(url: Url) -> Self {
        Self {
            url: Mutex::new(url),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(raw)?))
    }
}

impl NavigationContext for UrlNavigation {
    fn room_param(&self) -> Option<RoomId> {
        self.url
            .lock()
            .query_pairs()
            .find(|(key, _)| *key == ROOM_PARAM)
            .and_then(|(_, value)| RoomId::parse(&value))
    }

    fn set_room_param(&self, room: Option<&RoomId>) {
        let mut url = self.url.lock();
        *url = with_room_param(&url, room);
    }

    fn current_url(&self) -> Url {
        self.url.lock().clone()
    }
}
