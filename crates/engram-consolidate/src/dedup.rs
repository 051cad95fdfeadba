use engram_storage::text::{jaccard, tokenize};

/// Text similarity threshold above which two items are the same knowledge.
pub const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Plain union-find over indices, used to group near-duplicate facts.
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }

    /// Group members by root, preserving input order inside each group.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut by_root: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
        for i in 0..n {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        by_root.into_values().collect()
    }
}

/// Cluster texts into near-duplicate groups by pairwise token Jaccard.
pub fn group_near_duplicates(texts: &[&str]) -> Vec<Vec<usize>> {
    let token_sets: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t)).collect();
    let mut uf = UnionFind::new(texts.len());
    for i in 0..texts.len() {
        for j in (i + 1)..texts.len() {
            if jaccard(&token_sets[i], &token_sets[j]) >= SIMILARITY_THRESHOLD {
                uf.union(i, j);
            }
        }
    }
    uf.groups()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_duplicates_end_up_in_one_group() {
        let texts = [
            "bearer auth skipped when api key present",
            "bearer auth skipped when api key is present",
            "deploys run from ci only",
        ];
        let groups = group_near_duplicates(&texts);
        assert_eq!(groups.len(), 2);
        let dup_group = groups.iter().find(|g| g.len() == 2).expect("missing group");
        assert!(dup_group.contains(&0) && dup_group.contains(&1));
    }

    #[test]
    fn unrelated_texts_stay_separate() {
        let texts = ["alpha beta gamma", "delta epsilon zeta"];
        assert_eq!(group_near_duplicates(&texts).len(), 2);
    }
}
