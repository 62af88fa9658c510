//! N-dimensional bounding rectangles for spatial indexes.
//!
//! The parser accepts three shapes:
//! - inline literals: `[10 20],[30 40]`, `[10]`, `[-inf],[+inf]`
//! - WKT geometries: `POINT(1 2)`, `LINESTRING(...)`, `POLYGON(...)`, the
//!   MULTI* variants and GEOMETRYCOLLECTION, reduced to their bounding box
//! - GeoJSON: any document whose `coordinates`/`geometries`/`features`
//!   arrays yield positions, reduced to their bounding box
//!
//! Missing dimensions are unbounded; `-inf`/`+inf` components map to the
//! infinities.

/// An axis-aligned rectangle. `min.len() == max.len()`; a rectangle may
/// carry fewer dimensions than the query, in which case the absent
/// dimensions are treated as covering everything.
#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl Rect {
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Self {
        let mut r = Self { min, max };
        r.normalize();
        r
    }

    pub fn point(coords: Vec<f64>) -> Self {
        Self { min: coords.clone(), max: coords }
    }

    /// The number of dimensions carried.
    pub fn dims(&self) -> usize {
        self.min.len()
    }

    fn normalize(&mut self) {
        let dims = self.min.len().max(self.max.len());
        self.min.resize(dims, f64::NEG_INFINITY);
        self.max.resize(dims, f64::INFINITY);
        for i in 0..dims {
            if self.min[i] > self.max[i] {
                let lo = self.max[i];
                self.max[i] = self.min[i];
                self.min[i] = lo;
            }
        }
    }

    fn side(&self, i: usize) -> (f64, f64) {
        if i < self.dims() {
            (self.min[i], self.max[i])
        } else {
            (f64::NEG_INFINITY, f64::INFINITY)
        }
    }

    /// Whether `self` and `other` overlap in every dimension.
    pub fn intersects(&self, other: &Rect) -> bool {
        let dims = self.dims().max(other.dims());
        for i in 0..dims {
            let (amin, amax) = self.side(i);
            let (bmin, bmax) = other.side(i);
            if amin > bmax || bmin > amax {
                return false;
            }
        }
        true
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        let dims = self.dims().max(other.dims());
        for i in 0..dims {
            let (amin, amax) = self.side(i);
            let (bmin, bmax) = other.side(i);
            if bmin < amin || bmax > amax {
                return false;
            }
        }
        true
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        let dims = self.dims().max(other.dims());
        let mut min = Vec::with_capacity(dims);
        let mut max = Vec::with_capacity(dims);
        for i in 0..dims {
            let (amin, amax) = self.side(i);
            let (bmin, bmax) = other.side(i);
            min.push(amin.min(bmin));
            max.push(amax.max(bmax));
        }
        Rect { min, max }
    }

    /// Area proxy used for R-tree split heuristics: the product of finite
    /// side lengths (infinite sides contribute a large constant).
    pub fn area(&self) -> f64 {
        let mut area = 1.0;
        for i in 0..self.dims() {
            let (min, max) = self.side(i);
            let side = max - min;
            area *= if side.is_finite() { side.max(f64::MIN_POSITIVE) } else { 1e300 };
        }
        area
    }

    /// Parse any accepted rectangle shape.
    pub fn parse(s: &str) -> Option<Rect> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if s.starts_with('[') || s.starts_with(',') {
            return parse_literal(s);
        }
        if s.starts_with('{') {
            return parse_geojson(s);
        }
        parse_wkt(s)
    }

    /// Render in the literal form, `[min...],[max...]`, collapsing to a
    /// single group when min equals max.
    pub fn format(&self) -> String {
        let group = |coords: &[f64]| {
            let parts: Vec<String> = coords.iter().map(|c| format_coord(*c)).collect();
            format!("[{}]", parts.join(" "))
        };
        if self.min == self.max {
            group(&self.min)
        } else {
            format!("{},{}", group(&self.min), group(&self.max))
        }
    }
}

fn format_coord(c: f64) -> String {
    if c == f64::INFINITY {
        "+inf".to_string()
    } else if c == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{c}")
    }
}

fn parse_component(s: &str) -> Option<f64> {
    match s {
        "-inf" => Some(f64::NEG_INFINITY),
        "+inf" | "inf" => Some(f64::INFINITY),
        other => other.parse().ok(),
    }
}

/// `[a b c],[d e f]`; either group may be absent or empty.
fn parse_literal(s: &str) -> Option<Rect> {
    let mut groups: Vec<Vec<f64>> = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let inner = part.strip_prefix('[')?.strip_suffix(']')?;
        let mut coords = Vec::new();
        for comp in inner.split_whitespace() {
            coords.push(parse_component(comp)?);
        }
        groups.push(coords);
    }
    match groups.len() {
        0 => Some(Rect::new(Vec::new(), Vec::new())),
        1 => {
            let g = groups.pop()?;
            Some(Rect::new(g.clone(), g))
        }
        2 => {
            let max = groups.pop()?;
            let min = groups.pop()?;
            Some(Rect::new(min, max))
        }
        _ => None,
    }
}

/// WKT reduces to the bounding box of every coordinate tuple found in the
/// parenthesized body. Tuples are whitespace-separated numbers delimited
/// by commas or nested parens.
fn parse_wkt(s: &str) -> Option<Rect> {
    let open = s.find('(')?;
    let name = s[..open].trim().to_ascii_uppercase();
    const KNOWN: [&str; 7] = [
        "POINT",
        "LINESTRING",
        "POLYGON",
        "MULTIPOINT",
        "MULTILINESTRING",
        "MULTIPOLYGON",
        "GEOMETRYCOLLECTION",
    ];
    if !KNOWN.iter().any(|k| name.starts_with(k)) {
        return None;
    }
    let body = &s[open..];
    let mut bounds: Option<Rect> = None;
    for tuple in body.split(|c: char| c == ',' || c == '(' || c == ')') {
        let coords: Vec<f64> = tuple
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        if coords.is_empty() {
            continue;
        }
        let point = Rect::point(coords);
        bounds = Some(match bounds {
            Some(b) => b.union(&point),
            None => point,
        });
    }
    bounds
}

/// GeoJSON reduces to the bounding box of every position found under
/// `coordinates`, recursing through `geometries` and `features`.
fn parse_geojson(s: &str) -> Option<Rect> {
    let doc: serde_json::Value = serde_json::from_str(s).ok()?;
    let mut bounds: Option<Rect> = None;
    collect_geojson(&doc, &mut bounds);
    bounds
}

fn collect_geojson(value: &serde_json::Value, bounds: &mut Option<Rect>) {
    use serde_json::Value;
    let Value::Object(obj) = value else { return };
    if let Some(coords) = obj.get("coordinates") {
        collect_positions(coords, bounds);
    }
    for key in ["geometries", "features"] {
        if let Some(Value::Array(items)) = obj.get(key) {
            for item in items {
                collect_geojson(item, bounds);
            }
        }
    }
    if let Some(geometry) = obj.get("geometry") {
        collect_geojson(geometry, bounds);
    }
}

fn collect_positions(value: &serde_json::Value, bounds: &mut Option<Rect>) {
    use serde_json::Value;
    let Value::Array(items) = value else { return };
    if items.iter().all(Value::is_number) && !items.is_empty() {
        let coords: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
        let point = Rect::point(coords);
        *bounds = Some(match bounds.take() {
            Some(b) => b.union(&point),
            None => point,
        });
        return;
    }
    for item in items {
        collect_positions(item, bounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_pair() {
        let r = Rect::parse("[10 10],[20 20]").unwrap();
        assert_eq!(r.min, vec![10.0, 10.0]);
        assert_eq!(r.max, vec![20.0, 20.0]);
    }

    #[test]
    fn test_parse_literal_point() {
        let r = Rect::parse("[10 11]").unwrap();
        assert_eq!(r.min, r.max);
    }

    #[test]
    fn test_parse_infinities() {
        let r = Rect::parse("[-inf],[+inf]").unwrap();
        assert_eq!(r.min, vec![f64::NEG_INFINITY]);
        assert_eq!(r.max, vec![f64::INFINITY]);
    }

    #[test]
    fn test_parse_swapped_bounds_normalize() {
        let r = Rect::parse("[10 11],[11 10]").unwrap();
        assert_eq!(r.min, vec![10.0, 10.0]);
        assert_eq!(r.max, vec![11.0, 11.0]);
    }

    #[test]
    fn test_parse_wkt_point() {
        let r = Rect::parse("POINT(1 2)").unwrap();
        assert_eq!(r.min, vec![1.0, 2.0]);
        assert_eq!(r.max, vec![1.0, 2.0]);
    }

    #[test]
    fn test_parse_wkt_linestring_bbox() {
        let r = Rect::parse("LINESTRING(3 4, -1 -3, 7 0)").unwrap();
        assert_eq!(r.min, vec![-1.0, -3.0]);
        assert_eq!(r.max, vec![7.0, 4.0]);
    }

    #[test]
    fn test_parse_geojson_point() {
        let r = Rect::parse(r#"{"type":"Point","coordinates":[1,2]}"#).unwrap();
        assert_eq!(r.min, vec![1.0, 2.0]);
    }

    #[test]
    fn test_parse_geojson_collection() {
        let r = Rect::parse(
            r#"{"type":"GeometryCollection","geometries":[
                {"type":"Point","coordinates":[10,20]},
                {"type":"LineString","coordinates":[[-5,0],[3,30]]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(r.min, vec![-5.0, 0.0]);
        assert_eq!(r.max, vec![10.0, 30.0]);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Rect::parse("nonsense").is_none());
        assert!(Rect::parse("[a b]").is_none());
    }

    #[test]
    fn test_intersects() {
        let a = Rect::parse("[0 0],[10 10]").unwrap();
        let b = Rect::parse("[5 5],[15 15]").unwrap();
        let c = Rect::parse("[11 11],[12 12]").unwrap();
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        // touching edges intersect
        let d = Rect::parse("[10 10],[20 20]").unwrap();
        assert!(a.intersects(&d));
    }

    #[test]
    fn test_missing_dims_are_unbounded() {
        let query = Rect::parse("[21],[30]").unwrap();
        let item = Rect::parse("[10 10],[20 20]").unwrap();
        assert!(!query.intersects(&item));
        let all = Rect::parse("[-inf],[+inf]").unwrap();
        assert!(all.intersects(&item));
        assert!(all.contains(&item));
    }

    #[test]
    fn test_contains() {
        let outer = Rect::parse("[0 0],[10 10]").unwrap();
        let inner = Rect::parse("[2 2],[3 3]").unwrap();
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_format_roundtrip() {
        for s in ["[10 10],[20 20]", "[1 2]", "[-inf],[+inf]"] {
            let r = Rect::parse(s).unwrap();
            assert_eq!(Rect::parse(&r.format()).unwrap(), r);
        }
    }
}
