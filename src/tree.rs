//! Builds the nested reply structure of an article's comments from the flat,
//! chronologically ordered list the store returns. See [`build_tree`].

use std::collections::HashMap;

/// A record that can be placed in a reply tree. [`crate::models::Comment`]
/// is the main implementor, but anything carrying an id and an optional
/// parent id will do.
pub trait Threaded {
    fn id(&self) -> i64;
    fn parent_id(&self) -> Option<i64>;
}

/// A comment together with its direct replies, in input order.
#[derive(Debug, PartialEq)]
pub struct CommentNode<T> {
    pub comment: T,
    pub children: Vec<CommentNode<T>>,
}

impl<T> Drop for CommentNode<T> {
    /// Tears the subtree down iteratively; the derived drop glue would recurse
    /// once per level of nesting.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Turns `comments` (all belonging to one article, oldest first) into a
/// forest of [`CommentNode`]s.
///
/// * Top-level comments become roots, in input order.
/// * Each reply is appended to its parent's children, in input order.
/// * A reply whose parent is not among `comments` is promoted to a root in
///   its chronological position rather than discarded.
/// * Comments that can't be reached from any root (a comment naming itself
///   as parent, or a parent cycle) are broken up by promoting the earliest
///   comment of each such group, so every input comment appears exactly
///   once in the output.
///
/// Runs in O(n) and never recurses, so reply chains of any depth are fine.
pub fn build_tree<T: Threaded>(comments: Vec<T>) -> Vec<CommentNode<T>> {
    let mut positions: HashMap<i64, usize> = HashMap::with_capacity(comments.len());
    for (i, comment) in comments.iter().enumerate() {
        positions.entry(comment.id()).or_insert(i);
    }

    let mut parents: Vec<Option<usize>> = Vec::with_capacity(comments.len());
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    let mut roots: Vec<usize> = Vec::new();
    for (i, comment) in comments.iter().enumerate() {
        match comment
            .parent_id()
            .and_then(|parent| positions.get(&parent).copied())
        {
            Some(parent) => {
                children[parent].push(i);
                parents.push(Some(parent));
            }
            None => {
                roots.push(i);
                parents.push(None);
            }
        }
    }

    let mut reachable = vec![false; comments.len()];
    mark_reachable(&roots, &children, &mut reachable);
    let mut promoted = false;
    for i in 0..comments.len() {
        if reachable[i] {
            continue;
        }
        if let Some(parent) = parents[i].take() {
            children[parent].retain(|&child| child != i);
        }
        roots.push(i);
        mark_reachable(&[i], &children, &mut reachable);
        promoted = true;
    }
    if promoted {
        roots.sort_unstable();
    }

    // Assemble bottom-up: in reverse pre-order every child is finished
    // before its parent is.
    let order = preorder(&roots, &children);
    let mut slots: Vec<Option<T>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode<T>>> = Vec::with_capacity(slots.len());
    built.resize_with(slots.len(), || None);
    for &i in order.iter().rev() {
        let node = CommentNode {
            comment: slots[i].take().expect("each comment is visited once"),
            children: children[i]
                .iter()
                .map(|&child| built[child].take().expect("children are built first"))
                .collect(),
        };
        built[i] = Some(node);
    }

    roots
        .iter()
        .map(|&root| built[root].take().expect("roots are built"))
        .collect()
}

/// Flattens a forest in pre-order: every comment is yielded before its
/// replies, and siblings keep their order.
pub fn flatten<T>(roots: &[CommentNode<T>]) -> Vec<&T> {
    thread(roots).into_iter().map(|entry| entry.comment).collect()
}

/// One comment of a flattened thread, with where it sits in the tree.
#[derive(Debug, PartialEq)]
pub struct ThreadEntry<'a, T> {
    pub comment: &'a T,

    /// 0 for roots, 1 for their replies, and so on.
    pub depth: usize,

    /// How many reply levels end right after this comment. Only a comment
    /// without replies closes anything.
    pub closes: usize,

    pub has_replies: bool,
}

/// Flattens a forest in pre-order like [`flatten`], recording each
/// comment's depth and where the nesting closes so that a thread of any
/// depth can be laid out with a single loop.
pub fn thread<T>(roots: &[CommentNode<T>]) -> Vec<ThreadEntry<'_, T>> {
    let mut out: Vec<ThreadEntry<'_, T>> = Vec::new();
    let mut stack: Vec<(&CommentNode<T>, usize)> = roots.iter().rev().map(|n| (n, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        out.push(ThreadEntry {
            comment: &node.comment,
            depth,
            closes: 0,
            has_replies: !node.children.is_empty(),
        });
        stack.extend(node.children.iter().rev().map(|n| (n, depth + 1)));
    }
    for i in 0..out.len() {
        if out[i].has_replies {
            continue;
        }
        let next_depth = out.get(i + 1).map_or(0, |next| next.depth);
        out[i].closes = out[i].depth - next_depth;
    }
    out
}

fn mark_reachable(from: &[usize], children: &[Vec<usize>], reachable: &mut [bool]) {
    let mut stack: Vec<usize> = from.to_vec();
    while let Some(i) = stack.pop() {
        if reachable[i] {
            continue;
        }
        reachable[i] = true;
        stack.extend(children[i].iter().copied());
    }
}

fn preorder(roots: &[usize], children: &[Vec<usize>]) -> Vec<usize> {
    let mut out = Vec::with_capacity(children.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(i) = stack.pop() {
        out.push(i);
        stack.extend(children[i].iter().rev().copied());
    }
    out
}
