use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

pub fn deezer_track_url(track_id: &str) -> String {
    format!("https://www.deezer.com/track/{track_id}")
}

/// Cover image endpoint embedded in the album id; Deezer redirects it to the medium cover.
pub fn deezer_album_image_url(album_id: &str) -> String {
    let encoded = utf8_percent_encode(album_id, NON_ALPHANUMERIC).to_string();
    format!("https://api.deezer.com/album/{encoded}/image")
}

pub fn artwork_identifier(title: &str, artists: &str, album: Option<&str>) -> String {
    let mut query = format!("track:{title} artist:{artists}");
    if let Some(album) = album.filter(|a| !a.is_empty()) {
        query.push_str(&format!(" album:{album}"));
    }
    query
}

pub fn spotify_search_url(identifier: &str, region: &str) -> String {
    let encoded = utf8_percent_encode(identifier, NON_ALPHANUMERIC).to_string();
    let market = utf8_percent_encode(region, NON_ALPHANUMERIC).to_string();
    format!("https://api.spotify.com/v1/search?q={encoded}&type=track&market={market}&limit=1")
}
