/// A dense `num_slots x features` array of one sample, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotArray {
    data: Vec<f64>,
    num_slots: usize,
    features: usize,
}

impl SlotArray {
    pub fn zeros(num_slots: usize, features: usize) -> Self {
        Self::filled(num_slots, &vec![0.0; features])
    }

    /// Every slot initialized with a copy of `row`.
    pub fn filled(num_slots: usize, row: &[f64]) -> Self {
        Self {
            data: row.repeat(num_slots),
            num_slots,
            features: row.len(),
        }
    }

    /// Wraps a flat buffer holding `num_slots * features` values.
    pub fn from_vec(data: Vec<f64>, num_slots: usize, features: usize) -> Self {
        assert_eq!(data.len(), num_slots * features, "buffer does not match shape");
        Self {
            data,
            num_slots,
            features,
        }
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn row(&self, slot: usize) -> &[f64] {
        &self.data[slot * self.features..(slot + 1) * self.features]
    }

    pub fn row_mut(&mut self, slot: usize) -> &mut [f64] {
        &mut self.data[slot * self.features..(slot + 1) * self.features]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.features)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f64]> {
        self.data.chunks_exact_mut(self.features)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Joins `left` and `right` slot by slot along the feature axis.
    ///
    /// ```text
    /// [x y w h o] ++ [c1 .. ck]  ->  [x y w h o c1 .. ck]
    /// ```
    pub fn concat(left: &SlotArray, right: &SlotArray) -> SlotArray {
        assert_eq!(left.num_slots, right.num_slots, "slot counts differ");

        let features = left.features + right.features;
        let mut data = Vec::with_capacity(left.num_slots * features);

        for (l, r) in left.rows().zip(right.rows()) {
            data.extend_from_slice(l);
            data.extend_from_slice(r);
        }

        SlotArray {
            data,
            num_slots: left.num_slots,
            features,
        }
    }
}
