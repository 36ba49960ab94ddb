// Neighbour lookup over the sample grid behind the visibility mesh.
//
// Vertices are numbered 1..=width*height in row-major order; index 0 is the
// fan centre and is never part of the grid. A row holds `width` consecutive
// indices, so "left/right" walks within a row and "up/down" jumps a row.
//
//   row 2:   9  10  11  12
//   row 1:   5   6   7   8      (width = 4, height = 3)
//   row 0:   1   2   3   4
//
// Every lookup returns `None` at the border. Diagonals compose a horizontal
// step with a vertical one, so `None` propagates through the composition.

/// Index arithmetic for a `width` × `height` grid of 1-based linear indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndex {
    width: usize,
    max: usize,
}

impl GridIndex {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, max: width * height }
    }

    /// Largest valid index (`width * height`).
    pub fn max(&self) -> usize { self.max }

    /// True if `i` names a grid cell. The fan centre (0) does not.
    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        i >= 1 && i <= self.max
    }

    pub fn left(&self, i: usize) -> Option<usize> {
        if !self.contains(i) || (i - 1) % self.width == 0 {
            return None;
        }
        Some(i - 1)
    }

    pub fn right(&self, i: usize) -> Option<usize> {
        if !self.contains(i) || i % self.width == 0 {
            return None;
        }
        Some(i + 1)
    }

    pub fn up(&self, i: usize) -> Option<usize> {
        if !self.contains(i) || i + self.width > self.max {
            return None;
        }
        Some(i + self.width)
    }

    pub fn down(&self, i: usize) -> Option<usize> {
        if !self.contains(i) || i <= self.width {
            return None;
        }
        Some(i - self.width)
    }

    pub fn up_left(&self, i: usize) -> Option<usize> {
        self.left(i).and_then(|l| self.up(l))
    }

    pub fn up_right(&self, i: usize) -> Option<usize> {
        self.right(i).and_then(|r| self.up(r))
    }

    pub fn down_left(&self, i: usize) -> Option<usize> {
        self.left(i).and_then(|l| self.down(l))
    }

    pub fn down_right(&self, i: usize) -> Option<usize> {
        self.right(i).and_then(|r| self.down(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // (row, column) of a 1-based index, for checking against plain geometry.
    fn cell(width: usize, i: usize) -> (usize, usize) {
        ((i - 1) / width, (i - 1) % width)
    }

    #[test]
    fn border_predicates_match_rows_and_columns() {
        for (w, h) in [(4, 4), (3, 5), (5, 2), (1, 1), (1, 4), (4, 1)] {
            let grid = GridIndex::new(w, h);
            for i in 1..=grid.max() {
                let (row, col) = cell(w, i);
                assert_eq!(grid.left(i).is_none(), col == 0, "left({i}) on {w}x{h}");
                assert_eq!(grid.right(i).is_none(), col == w - 1, "right({i}) on {w}x{h}");
                assert_eq!(grid.up(i).is_none(), row == h - 1, "up({i}) on {w}x{h}");
                assert_eq!(grid.down(i).is_none(), row == 0, "down({i}) on {w}x{h}");
            }
        }
    }

    #[test]
    fn neighbours_are_one_step_away() {
        let grid = GridIndex::new(4, 4);
        for i in 1..=grid.max() {
            let (row, col) = cell(4, i);
            if let Some(l) = grid.left(i) { assert_eq!(cell(4, l), (row, col - 1)); }
            if let Some(r) = grid.right(i) { assert_eq!(cell(4, r), (row, col + 1)); }
            if let Some(u) = grid.up(i) { assert_eq!(cell(4, u), (row + 1, col)); }
            if let Some(d) = grid.down(i) { assert_eq!(cell(4, d), (row - 1, col)); }
        }
    }

    #[test]
    fn diagonals_compose_and_propagate_none() {
        let grid = GridIndex::new(4, 4);
        for i in 1..=grid.max() {
            assert_eq!(grid.up_left(i), grid.left(i).and_then(|x| grid.up(x)));
            assert_eq!(grid.up_right(i), grid.right(i).and_then(|x| grid.up(x)));
            assert_eq!(grid.down_left(i), grid.left(i).and_then(|x| grid.down(x)));
            assert_eq!(grid.down_right(i), grid.right(i).and_then(|x| grid.down(x)));
        }

        // Corners: every diagonal pointing off the grid is absent.
        assert_eq!(grid.down_left(1), None);
        assert_eq!(grid.up_left(1), None);
        assert_eq!(grid.down_right(1), None);
        assert_eq!(grid.up_right(1), Some(6));
        assert_eq!(grid.down_left(16), Some(11));
        assert_eq!(grid.up_right(16), None);
    }

    #[test]
    fn centre_and_out_of_range_indices_have_no_neighbours() {
        let grid = GridIndex::new(4, 4);
        for i in [0, 17, 100] {
            assert_eq!(grid.left(i), None);
            assert_eq!(grid.right(i), None);
            assert_eq!(grid.up(i), None);
            assert_eq!(grid.down(i), None);
            assert_eq!(grid.up_right(i), None);
            assert_eq!(grid.down_left(i), None);
        }
    }

    #[test]
    fn single_cell_grid_is_isolated() {
        let grid = GridIndex::new(1, 1);
        assert_eq!(grid.max(), 1);
        assert_eq!(grid.left(1), None);
        assert_eq!(grid.right(1), None);
        assert_eq!(grid.up(1), None);
        assert_eq!(grid.down(1), None);
    }
}
