use serde::Deserialize;

const MAX_LIMIT: i64 = 100;

/// `?limit&offset` query shared by every list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    /// `(limit, offset)` with limit in `1..=100` and offset non-negative.
    /// An absent limit takes the endpoint's `default_limit`.
    pub fn window(&self, default_limit: i64) -> (i64, i64) {
        (
            self.limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_values_take_the_endpoint_default() {
        let p: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!(p.window(10), (10, 0));
        assert_eq!(p.window(20), (20, 0));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let p = Pagination {
            limit: Some(1000),
            offset: Some(-5),
        };
        assert_eq!(p.window(10), (100, 0));
        let p = Pagination {
            limit: Some(0),
            offset: Some(40),
        };
        assert_eq!(p.window(10), (1, 40));
    }
}
