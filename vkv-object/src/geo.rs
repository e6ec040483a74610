//! Geo support is layered on top of `SortedSet`: a geo key is a sorted
//! set whose scores are 52-bit interleaved (longitude, latitude)
//! geohashes, so GEOADD is ZADD with a computed score and GEODIST/
//! GEOHASH/GEOSEARCH are read-side helpers over the same structure.

use crate::sorted_set::SortedSet;

const LAT_MIN: f64 = -85.05112878;
const LAT_MAX: f64 = 85.05112878;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;
const STEP: u32 = 26; // bits per coordinate; 26+26 = 52 total.
const EARTH_RADIUS_M: f64 = 6_372_797.560_856;

pub const GEO_HASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

fn interleave(lat_bits: u32, lon_bits: u32) -> u64 {
    let mut result: u64 = 0;
    for i in 0..STEP {
        result |= (((lon_bits >> i) & 1) as u64) << (2 * i + 1);
        result |= (((lat_bits >> i) & 1) as u64) << (2 * i);
    }
    result
}

fn deinterleave(bits: u64) -> (u32, u32) {
    let mut lat_bits: u32 = 0;
    let mut lon_bits: u32 = 0;
    for i in 0..STEP {
        lat_bits |= (((bits >> (2 * i)) & 1) as u32) << i;
        lon_bits |= (((bits >> (2 * i + 1)) & 1) as u32) << i;
    }
    (lat_bits, lon_bits)
}

fn quantize(value: f64, min: f64, max: f64) -> u32 {
    let normalized = (value - min) / (max - min);
    (normalized * ((1u64 << STEP) as f64)) as u32
}

fn unquantize(bits: u32, min: f64, max: f64) -> f64 {
    let cell = (max - min) / (1u64 << STEP) as f64;
    min + (bits as f64 + 0.5) * cell
}

/// Encodes `(lat, lon)` as the 52-bit interleaved score used as a
/// sorted-set member score. Returns `None` for out-of-range input.
pub fn geo_encode(lat: f64, lon: f64) -> Option<u64> {
    if !(LAT_MIN..=LAT_MAX).contains(&lat) || !(LON_MIN..=LON_MAX).contains(&lon) {
        return None;
    }
    let lat_bits = quantize(lat, LAT_MIN, LAT_MAX);
    let lon_bits = quantize(lon, LON_MIN, LON_MAX);
    Some(interleave(lat_bits, lon_bits))
}

/// Decodes a score produced by `geo_encode` back to approximate
/// `(lat, lon)`. Round-trips within ~1e-5 degrees for valid input.
pub fn geo_decode(bits: u64) -> (f64, f64) {
    let (lat_bits, lon_bits) = deinterleave(bits);
    (unquantize(lat_bits, LAT_MIN, LAT_MAX), unquantize(lon_bits, LON_MIN, LON_MAX))
}

/// Standard 11-character geohash string (base-32, same alphabet as the
/// public geohash.org encoding) for a previously-encoded score.
pub fn geo_hash_string(bits: u64) -> String {
    // Pad the 52-bit interleaved score to 55 bits (11 * 5) so the
    // base-32 digits line up read from the most-significant end.
    let padded = bits << 3;
    let mut out = String::with_capacity(11);
    for i in (0..11).rev() {
        let digit = ((padded >> (i * 5)) & 0x1f) as usize;
        out.push(GEO_HASH_ALPHABET[digit] as char);
    }
    out
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((lon2 - lon1) / 2.0).sin();
    let a = u * u + lat1.cos() * lat2.cos() * v * v;
    let meters = 2.0 * EARTH_RADIUS_M * a.sqrt().asin();
    meters / 1000.0
}

/// A longitude/latitude-aligned bounding box, in degrees, for
/// GEOSEARCH BYBOX. By-radius search is out of scope (spec.md §4.6) --
/// a radius query should be rejected with an `unknown command` error
/// at the dispatch layer rather than attempted here.
#[derive(Clone, Copy, Debug)]
pub struct GeoBox {
    pub center_lat: f64,
    pub center_lon: f64,
    pub width_km: f64,
    pub height_km: f64,
}

impl GeoBox {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        let dx = haversine_km(self.center_lat, self.center_lon, self.center_lat, lon);
        let dy = haversine_km(self.center_lat, self.center_lon, lat, self.center_lon);
        dx <= self.width_km / 2.0 && dy <= self.height_km / 2.0
    }

    /// Full scan of the underlying set's members -- geo keys are
    /// expected to be modestly sized (per-region member sets), so this
    /// trades a spatial index for simplicity, same tradeoff the object
    /// layer makes for sorted-set subset counting.
    pub fn search(&self, set: &SortedSet) -> Vec<(Vec<u8>, f64, f64)> {
        set.iter()
            .filter_map(|(member, score)| {
                let (lat, lon) = geo_decode(score as u64);
                if self.contains(lat, lon) {
                    Some((member.to_vec(), lat, lon))
                } else {
                    None
                }
            })
            .collect()
    }
}
