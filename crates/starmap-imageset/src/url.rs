//! Tile URL templating.
//!
//! Templates use `{X}`, `{Y}`, `{L}` for the raw tile address, `{Q}` for the
//! quad-tree path and `{S}` (or `{S:0}`..`{S:3}`) for a server shard. Older
//! templates use positional `{1}`, `{2}`, `{3}` instead and are handled when
//! `{X}` is absent.

use crate::{Imageset, ProjectionType};

/// Quad-tree path for a tile, one mapped character per level.
///
/// Characters run from the leaf's own quadrant up to the quadrant just below
/// the root. Equirectangular pyramids encode one extra level because their
/// level-0 row is already two tiles wide.
#[must_use]
pub fn quad_key(imageset: &Imageset, level: u32, x: u32, y: u32) -> String {
    let depth = if imageset.projection == ProjectionType::Equirectangular {
        level + 1
    } else {
        level
    };
    let alphabet: Vec<char> = imageset.quad_tree_map.chars().collect();

    let mut key = String::with_capacity(depth as usize);
    for bit in 0..depth.min(32) {
        let mask = 1u32 << bit;
        let mut digit = 0;
        if x & mask != 0 {
            digit += 1;
        }
        if y & mask != 0 {
            digit += 2;
        }
        let ch = alphabet
            .get(digit)
            .copied()
            .unwrap_or_else(|| char::from(b'0' + digit as u8));
        key.push(ch);
    }
    key
}

/// Shard number derived from the tile's own quadrant.
#[must_use]
pub fn server_id(x: u32, y: u32) -> u32 {
    (x & 1) + ((y & 1) << 1)
}

/// Expand `template` for the tile at `(level, x, y)` of `imageset`.
///
/// `template` is passed separately so the same rules serve both the imagery
/// and the elevation URL of a dataset.
#[must_use]
pub fn tile_url(imageset: &Imageset, template: &str, level: u32, x: u32, y: u32) -> String {
    if !template.contains("{X}") && template.contains("{1}") {
        return positional_url(imageset, template, level, x, y);
    }

    let mut url = template
        .replace("{X}", &x.to_string())
        .replace("{Y}", &y.to_string())
        .replace("{L}", &level.to_string());

    let mut shard = 0;
    for n in 0..4 {
        let literal = format!("{{S:{n}}}");
        if url.contains(&literal) {
            shard = n;
            url = url.replace(&literal, "{S}");
        }
    }

    // Legacy provider host names.
    url = url.replace("a{S}", "r{S}").replace("h{S}", "r{S}");
    url = url.replace(
        "//r{S}.ortho.tiles.virtualearth.net",
        "//ecn.t{S}.tiles.virtualearth.net",
    );

    let path = quad_key(imageset, level, x, y);
    // The root has no quadrant digit; the literal form supplies the shard.
    let server = if level == 0 { shard } else { server_id(x, y) };

    url = url.replace("{Q}", &path).replace("{S}", &server.to_string());
    if url.contains("virtualearth.net") {
        url.push_str("&n=z");
    }
    url
}

fn positional_url(imageset: &Imageset, template: &str, level: u32, x: u32, y: u32) -> String {
    if imageset.projection == ProjectionType::Mercator && !imageset.quad_tree_map.is_empty() {
        template
            .replace("{1}", &server_id(x, y).to_string())
            .replace("{3}", &quad_key(imageset, level, x, y))
    } else {
        template
            .replace("{1}", &level.to_string())
            .replace("{2}", &x.to_string())
            .replace("{3}", &y.to_string())
    }
}

/// HiPS tile URL: `{base}/Norder{order}/Dir{dir}/Npix{npix}.{ext}`.
#[must_use]
pub fn hips_tile_url(base: &str, order: u32, npix: u64, extension: &str) -> String {
    let dir = (npix / 10_000) * 10_000;
    format!(
        "{}/Norder{order}/Dir{dir}/Npix{npix}.{extension}",
        base.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mercator(url: &str) -> Imageset {
        Imageset::new("test", url, ProjectionType::Mercator)
    }

    #[test]
    fn test_xyz_substitution() {
        let set = mercator("http://x/{L}/{X}_{Y}.png");
        assert_eq!(tile_url(&set, &set.url, 3, 5, 7), "http://x/3/5_7.png");
    }

    #[test]
    fn test_quad_key_is_leaf_first() {
        let set = mercator("http://x/{Q}.png");
        // x = 0b01, y = 0b10: the leaf quadrant is 1, the one below the root is 2.
        assert_eq!(quad_key(&set, 2, 1, 2), "12");
        assert_eq!(tile_url(&set, &set.url, 2, 1, 2), "http://x/12.png");
    }

    #[test]
    fn test_quad_key_uses_character_map() {
        let mut set = mercator("http://x/{Q}");
        set.quad_tree_map = "ABCD".to_string();
        assert_eq!(quad_key(&set, 2, 1, 2), "BC");
        assert_eq!(quad_key(&set, 0, 0, 0), "");
    }

    #[test]
    fn test_equirect_quad_key_has_extra_level() {
        let set = Imageset::new("e", "http://x/{Q}", ProjectionType::Equirectangular);
        assert_eq!(quad_key(&set, 0, 1, 0), "1");
        assert_eq!(quad_key(&set, 1, 2, 1), "21");
    }

    #[test]
    fn test_server_from_leaf_quadrant() {
        let set = mercator("http://t{S}.host/{Q}.jpg");
        // Leaf quadrant of (1, 2) is 1, the first digit of "12".
        assert_eq!(tile_url(&set, &set.url, 2, 1, 2), "http://t1.host/12.jpg");
    }

    #[test]
    fn test_server_is_digit_under_lettered_map() {
        let mut set = mercator("http://t{S}.host/{Q}");
        set.quad_tree_map = "ABCD".to_string();
        let url = tile_url(&set, &set.url, 2, 1, 2);
        assert_eq!(url, "http://t1.host/BC");
        assert_eq!(server_id(1, 2), 1);
    }

    #[test]
    fn test_server_literal_form_used_at_root() {
        let set = mercator("http://t{S:3}.host/{L}");
        assert_eq!(tile_url(&set, &set.url, 0, 0, 0), "http://t3.host/0");
    }

    #[test]
    fn test_virtualearth_rewrite() {
        let set = mercator("http://a{S}.ortho.tiles.virtualearth.net/tiles/a{Q}.jpeg?g=15");
        let url = tile_url(&set, &set.url, 1, 1, 0);
        assert_eq!(
            url,
            "http://ecn.t1.tiles.virtualearth.net/tiles/a1.jpeg?g=15&n=z"
        );
    }

    #[test]
    fn test_positional_fallback() {
        let set = Imageset::dss();
        assert_eq!(
            tile_url(&set, &set.url, 4, 10, 3),
            "http://cdn.worldwidetelescope.org/wwtweb/dss.aspx?q=4,10,3"
        );
    }

    #[test]
    fn test_positional_mercator_quadtree() {
        let set = mercator("http://h{1}.host/tiles/{3}.png");
        assert_eq!(tile_url(&set, &set.url, 2, 1, 2), "http://h1.host/tiles/12.png");
    }

    #[test]
    fn test_hips_url_directory_buckets() {
        assert_eq!(
            hips_tile_url("http://alasky/DSS2/", 3, 767, "jpg"),
            "http://alasky/DSS2/Norder3/Dir0/Npix767.jpg"
        );
        assert_eq!(
            hips_tile_url("http://alasky/DSS2", 8, 123_456, "png"),
            "http://alasky/DSS2/Norder8/Dir120000/Npix123456.png"
        );
    }
}
