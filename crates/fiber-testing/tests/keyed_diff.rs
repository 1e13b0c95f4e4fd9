use fiber_core::HostOp;
use fiber_testing::prelude::*;

fn items(_: &mut Hooks, keys: &Vec<u32>) -> Render {
    Ok(el("ul")
        .children(keys.iter().map(|key| el("li").key(*key).child(key.to_string())))
        .into())
}

/// Children inserted into `list`, in commit order.
fn moved(ops: &[HostOp], list: usize) -> Vec<usize> {
    ops.iter()
        .filter_map(|op| match op {
            HostOp::Append { parent, child } | HostOp::InsertBefore { parent, child, .. } if *parent == list => {
                Some(*child)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn reorder_with_insertion_moves_and_creates_without_deleting() {
    let root = TestRoot::new();
    root.render(component(items, vec![1, 2, 3]));
    let ul = root.host().children(root.container())[0];
    let [a, b, c] = <[usize; 3]>::try_from(root.host().children(ul)).expect("three items");
    root.take_ops();

    root.render(component(items, vec![3, 1, 4, 2]));
    assert_eq!(root.html(), "<ul><li>3</li><li>1</li><li>4</li><li>2</li></ul>");

    let ops = root.take_ops();
    assert!(!ops.iter().any(|op| matches!(op, HostOp::Remove { .. })), "{ops:?}");
    let created: Vec<_> = ops
        .iter()
        .filter_map(|op| match op {
            HostOp::CreateInstance { id, tag } if tag == "li" => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(created.len(), 1);
    let d = created[0];

    let placed = moved(&ops, ul);
    // C keeps its slot; every item whose old index is behind the watermark
    // is re-placed, plus the new one.
    assert!(!placed.contains(&c));
    assert!(placed.contains(&a));
    assert!(placed.contains(&b));
    assert!(placed.contains(&d));
    assert_eq!(root.host().children(ul), vec![c, a, d, b]);
}

#[test]
fn appending_to_the_end_only_places_new_items() {
    let root = TestRoot::new();
    root.render(component(items, vec![1, 2]));
    let ul = root.host().children(root.container())[0];
    let before = root.host().children(ul);
    root.take_ops();

    root.render(component(items, vec![1, 2, 3]));
    let ops = root.take_ops();
    let placed = moved(&ops, ul);
    assert_eq!(placed.len(), 1);
    assert!(!before.contains(&placed[0]));
    assert_eq!(root.html(), "<ul><li>1</li><li>2</li><li>3</li></ul>");
}

#[test]
fn removing_keys_deletes_only_those_items() {
    let root = TestRoot::new();
    root.render(component(items, vec![1, 2, 3, 4]));
    let ul = root.host().children(root.container())[0];
    let before = root.host().children(ul);
    root.take_ops();

    root.render(component(items, vec![1, 3]));
    let ops = root.take_ops();
    let removed: Vec<_> = ops
        .iter()
        .filter_map(|op| match op {
            HostOp::Remove { child, .. } => Some(*child),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec![before[1], before[3]]);
    assert!(moved(&ops, ul).is_empty());
    assert_eq!(root.host().children(ul), vec![before[0], before[2]]);
}

#[test]
fn key_change_recreates_the_item() {
    let root = TestRoot::new();
    root.render(component(items, vec![1]));
    let ul = root.host().children(root.container())[0];
    let old = root.host().children(ul)[0];

    root.render(component(items, vec![9]));
    let new = root.host().children(ul)[0];
    assert_ne!(old, new);
    assert_eq!(root.html(), "<ul><li>9</li></ul>");
}

#[test]
fn unkeyed_children_match_by_position() {
    let root = TestRoot::new();
    root.render(el("div").child(el("a")).child(el("b")));
    let div = root.host().children(root.container())[0];
    let before = root.host().children(div);

    root.render(el("div").child(el("a").attr("x", "1")).child(el("b")));
    assert_eq!(root.host().children(div), before);
    assert_eq!(root.html(), "<div><a x=\"1\"></a><b></b></div>");
}

fn labelled(_: &mut Hooks, entries: &Vec<(&'static str, &'static str)>) -> Render {
    Ok(el("ul")
        .children(entries.iter().map(|(key, label)| el("li").key(key).child(*label)))
        .into())
}

#[test]
fn duplicate_keys_do_not_leave_stale_items() {
    let root = TestRoot::new();
    root.render(component(labelled, vec![("x", "1"), ("x", "2")]));
    assert_eq!(root.html(), "<ul><li>1</li><li>2</li></ul>");

    root.render(component(labelled, vec![("y", "a"), ("z", "b")]));
    assert_eq!(root.html(), "<ul><li>a</li><li>b</li></ul>");
    let ul = root.host().children(root.container())[0];
    assert_eq!(root.host().children(ul).len(), 2);
}
