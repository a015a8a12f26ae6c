use crate::text::Token;

/// One step of a token alignment. Indices point into the heard and expected
/// token slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Match { heard: usize, expected: usize },
    Substitute { heard: usize, expected: usize },
    /// Extra learner token.
    Insert { heard: usize },
    /// Target token the learner left out.
    Delete { expected: usize },
}

impl EditOp {
    #[must_use]
    pub fn cost(self) -> usize {
        match self {
            EditOp::Match { .. } => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub ops: Vec<EditOp>,
    pub distance: usize,
}

/// Token-level Levenshtein alignment of `heard` against `expected`.
///
/// The table holds suffix distances and is walked front to back. On equal
/// cost the walk takes the diagonal, so a mismatched pair is reported as one
/// substitution rather than an insertion plus a deletion, and leftover tokens
/// are attributed to the end of the utterance.
#[must_use]
pub fn align(heard: &[Token], expected: &[Token]) -> Alignment {
    let (n, m) = (heard.len(), expected.len());
    let mut cost = vec![vec![0usize; m + 1]; n + 1];

    for (i, row) in cost.iter_mut().enumerate() {
        row[m] = n - i;
    }
    for (j, cell) in cost[n].iter_mut().enumerate() {
        *cell = m - j;
    }
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            let sub = usize::from(heard[i].text != expected[j].text);
            cost[i][j] = (cost[i + 1][j + 1] + sub)
                .min(cost[i + 1][j] + 1)
                .min(cost[i][j + 1] + 1);
        }
    }

    let mut ops = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m {
            let same = heard[i].text == expected[j].text;
            if cost[i][j] == cost[i + 1][j + 1] + usize::from(!same) {
                ops.push(if same {
                    EditOp::Match {
                        heard: i,
                        expected: j,
                    }
                } else {
                    EditOp::Substitute {
                        heard: i,
                        expected: j,
                    }
                });
                i += 1;
                j += 1;
                continue;
            }
        }
        if i < n && cost[i][j] == cost[i + 1][j] + 1 {
            ops.push(EditOp::Insert { heard: i });
            i += 1;
        } else {
            ops.push(EditOp::Delete { expected: j });
            j += 1;
        }
    }

    Alignment {
        distance: cost[0][0],
        ops,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::Span;

    fn tokens(words: &[&str]) -> Vec<Token> {
        let mut at = 0;
        words
            .iter()
            .map(|w| {
                let t = Token::new(*w, Span::new(at, at + w.len()));
                at += w.len() + 1;
                t
            })
            .collect()
    }

    #[test]
    fn identical_sequences_match() {
        let a = tokens(&["sa", "baai", "dii"]);
        let al = align(&a, &a);
        assert_eq!(al.distance, 0);
        assert!(al.ops.iter().all(|op| matches!(op, EditOp::Match { .. })));
    }

    #[test]
    fn prefers_substitution() {
        let al = align(&tokens(&["sa", "bai"]), &tokens(&["sa", "baai"]));
        assert_eq!(al.distance, 1);
        assert_eq!(
            al.ops,
            vec![
                EditOp::Match {
                    heard: 0,
                    expected: 0
                },
                EditOp::Substitute {
                    heard: 1,
                    expected: 1
                },
            ]
        );
    }

    #[test]
    fn reports_missing_and_extra_tokens() {
        let missing = align(&tokens(&["sa", "dii"]), &tokens(&["sa", "baai", "dii"]));
        assert_eq!(missing.distance, 1);
        assert!(missing.ops.contains(&EditOp::Delete { expected: 1 }));

        let extra = align(&tokens(&["sa", "baai", "dii", "lai"]), &tokens(&["sa", "baai", "dii"]));
        assert_eq!(extra.distance, 1);
        assert!(extra.ops.contains(&EditOp::Insert { heard: 3 }));
    }

    #[test]
    fn op_costs_sum_to_distance() {
        let al = align(&tokens(&["a", "x", "c", "d", "e"]), &tokens(&["a", "b", "c", "e", "f"]));
        let total: usize = al.ops.iter().map(|op| op.cost()).sum();
        assert_eq!(total, al.distance);
    }

    #[test]
    fn leftover_tokens_go_to_the_end() {
        let al = align(&tokens(&["sa2", "paai"]), &tokens(&["sa", "baai", "dii"]));
        assert_eq!(al.distance, 3);
        assert_eq!(al.ops.last(), Some(&EditOp::Delete { expected: 2 }));
    }

    #[test]
    fn empty_sides() {
        assert_eq!(align(&[], &tokens(&["a", "b"])).distance, 2);
        assert_eq!(align(&tokens(&["a"]), &[]).distance, 1);
        assert!(align(&[], &[]).ops.is_empty());
    }

    fn reference_distance(a: &[&str], b: &[&str]) -> usize {
        let mut prev: Vec<usize> = (0..=b.len()).collect();
        for (i, x) in a.iter().enumerate() {
            let mut row = vec![i + 1; b.len() + 1];
            for (j, y) in b.iter().enumerate() {
                row[j + 1] = (prev[j] + usize::from(x != y))
                    .min(prev[j + 1] + 1)
                    .min(row[j] + 1);
            }
            prev = row;
        }
        prev[b.len()]
    }

    /// Every word of up to `max_len` letters over `alphabet`.
    fn all_words<'a>(alphabet: &[&'a str], max_len: usize) -> Vec<Vec<&'a str>> {
        let mut words: Vec<Vec<&'a str>> = vec![Vec::new()];
        let mut frontier: Vec<Vec<&'a str>> = vec![Vec::new()];
        for _ in 0..max_len {
            let mut longer = Vec::with_capacity(frontier.len() * alphabet.len());
            for word in &frontier {
                for letter in alphabet {
                    let mut next = word.clone();
                    next.push(*letter);
                    longer.push(next);
                }
            }
            words.extend(longer.iter().cloned());
            frontier = longer;
        }
        words
    }

    #[test]
    fn distance_matches_classic_levenshtein_on_all_short_pairs() {
        let words = all_words(&["a", "b", "c"], 4);
        for heard in &words {
            for expected in &words {
                let al = align(&tokens(heard), &tokens(expected));
                assert_eq!(
                    al.distance,
                    reference_distance(heard, expected),
                    "{heard:?} vs {expected:?}"
                );

                let total: usize = al.ops.iter().map(|op| op.cost()).sum();
                assert_eq!(total, al.distance, "{heard:?} vs {expected:?}");

                let consumed_heard = al
                    .ops
                    .iter()
                    .filter(|op| !matches!(op, EditOp::Delete { .. }))
                    .count();
                let consumed_expected = al
                    .ops
                    .iter()
                    .filter(|op| !matches!(op, EditOp::Insert { .. }))
                    .count();
                assert_eq!(consumed_heard, heard.len());
                assert_eq!(consumed_expected, expected.len());
            }
        }
    }
}
