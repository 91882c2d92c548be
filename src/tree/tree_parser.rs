use std::fmt;

use anyhow::bail;
use log::info;
use pest::iterators::Pair;
use pest::{error::Error as PestError, Parser};
use pest_derive::Parser;

use crate::tree::{
    Node,
    NodeIdx::{self, Internal as Int, Leaf},
    Tree,
};
use crate::Result;

#[derive(Parser)]
#[grammar = "tree/newick.pest"]
pub struct NewickParser;

#[derive(Debug)]
pub struct ParsingError(pub Box<PestError<Rule>>);

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed newick string")?;
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParsingError {}

pub fn from_newick(newick: &str) -> Result<Vec<Tree>> {
    info!("Parsing newick trees.");
    let mut pairs = match NewickParser::parse(Rule::newick, newick) {
        Ok(pairs) => pairs,
        Err(e) => bail!(ParsingError(Box::new(e))),
    };
    let mut trees = Vec::new();
    let newick_rule = pairs.next().expect("a successful parse yields one rule");
    for tree_rule in newick_rule.into_inner() {
        match tree_rule.as_rule() {
            Rule::tree => {
                let subtree = tree_rule
                    .into_inner()
                    .next()
                    .expect("a tree rule holds a subtree");
                trees.push(build_tree(subtree)?);
            }
            Rule::EOI => (),
            _ => unreachable!(),
        }
    }
    info!("Finished parsing newick trees successfully.");
    Ok(trees)
}

fn build_tree(subtree: Pair<Rule>) -> Result<Tree> {
    let (internals, leaf_count) = count_nodes(&subtree);
    if internals > 0 && leaf_count != internals + 1 {
        bail!("Only strictly binary rooted trees are supported.");
    }
    let total = internals + leaf_count;
    let mut nodes: Vec<Option<Node>> = vec![None; total];
    let mut next_internal = 0;
    let mut next_leaf = internals;
    let root = build_node(subtree, None, &mut nodes, &mut next_internal, &mut next_leaf)?;
    let nodes = nodes
        .into_iter()
        .map(|node| node.expect("every arena slot is filled during the build"))
        .collect();
    Ok(Tree::from_nodes(nodes, root, leaf_count))
}

// (internal, leaf) node counts of the subtree under the rule
fn count_nodes(pair: &Pair<Rule>) -> (usize, usize) {
    match pair.as_rule() {
        Rule::leaf => (0, 1),
        Rule::internal => pair
            .clone()
            .into_inner()
            .filter(|inner| matches!(inner.as_rule(), Rule::internal | Rule::leaf))
            .fold((1, 0), |acc, inner| {
                let (i, l) = count_nodes(&inner);
                (acc.0 + i, acc.1 + l)
            }),
        _ => unreachable!(),
    }
}

fn build_node(
    pair: Pair<Rule>,
    parent: Option<NodeIdx>,
    nodes: &mut [Option<Node>],
    next_internal: &mut usize,
    next_leaf: &mut usize,
) -> Result<NodeIdx> {
    match pair.as_rule() {
        Rule::leaf => {
            let idx = *next_leaf;
            *next_leaf += 1;
            let mut id = String::new();
            let mut blen = 0.0;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::label => id = inner.as_str().to_string(),
                    Rule::blen => blen = parse_blen(inner)?,
                    _ => unreachable!(),
                }
            }
            nodes[idx] = Some(Node::new_leaf(idx, parent, blen, id));
            Ok(Leaf(idx))
        }
        Rule::internal => {
            let idx = *next_internal;
            *next_internal += 1;
            let mut children = Vec::with_capacity(2);
            let mut id = String::new();
            let mut blen = 0.0;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::internal | Rule::leaf => children.push(build_node(
                        inner,
                        Some(Int(idx)),
                        nodes,
                        next_internal,
                        next_leaf,
                    )?),
                    Rule::label => id = inner.as_str().to_string(),
                    Rule::blen => blen = parse_blen(inner)?,
                    _ => unreachable!(),
                }
            }
            nodes[idx] = Some(Node::new_internal(idx, parent, children, blen, id));
            Ok(Int(idx))
        }
        _ => unreachable!(),
    }
}

fn parse_blen(pair: Pair<Rule>) -> Result<f64> {
    let number = pair
        .into_inner()
        .next()
        .expect("a blen rule holds a number");
    Ok(number.as_str().parse::<f64>()?)
}
