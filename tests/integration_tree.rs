use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use ratatui::style::Style;

use termgrid::screen::HeadlessDriver;
use termgrid::{Error, Rect, Window, WindowManager, WindowMsg, handler};

fn recorder() -> (termgrid::Handler, Rc<RefCell<Vec<WindowMsg>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let h = handler(move |_window, msg| {
        sink.borrow_mut().push(msg.clone());
        0
    });
    (h, log)
}

fn paints(log: &Rc<RefCell<Vec<WindowMsg>>>) -> usize {
    log.borrow()
        .iter()
        .filter(|msg| matches!(msg, WindowMsg::Paint))
        .count()
}

/// Init with a fresh headless terminal, run the scenario, always shut down.
fn with_manager(cols: u16, rows: u16, scenario: impl FnOnce(&HeadlessDriver, &Window)) {
    let driver = HeadlessDriver::new(cols, rows);
    let root = WindowManager::init(Box::new(driver.clone())).expect("init");
    scenario(&driver, &root);
    WindowManager::shutdown();
}

#[test]
fn init_is_idempotent_and_shutdown_is_safe_twice() {
    let driver = HeadlessDriver::new(40, 12);
    let root = WindowManager::init(Box::new(driver.clone())).expect("init");
    assert!(driver.entered());

    // Second init returns the same root without touching the terminal again.
    let other_driver = HeadlessDriver::new(10, 5);
    let root_again = WindowManager::init(Box::new(other_driver.clone())).expect("re-init");
    assert_eq!(root, root_again);
    assert!(!other_driver.entered());

    WindowManager::shutdown();
    assert!(!driver.entered());
    assert!(WindowManager::current().is_none());

    // Window handles die with the manager.
    assert!(matches!(root.rect(), Err(Error::Shutdown)));

    // Second shutdown with nothing active.
    WindowManager::shutdown();
}

#[test]
fn root_covers_the_full_terminal() {
    with_manager(40, 12, |_, root| {
        assert_eq!(root.rect().unwrap(), Rect::new(0, 0, 40, 12));
    });
}

#[test]
fn leaf_paints_coalesce_into_one_message_and_one_flush() {
    with_manager(40, 12, |driver, _root| {
        let wm = WindowManager::current().unwrap();
        let (handler_a, log_a) = recorder();
        let (handler_b, log_b) = recorder();
        let a = wm
            .create(None, Rect::new(0, 0, 20, 12), Some(handler_a), 1)
            .unwrap();
        let b = wm
            .create(None, Rect::new(20, 0, 40, 12), Some(handler_b), 2)
            .unwrap();

        // Settle the paints queued by creation.
        wm.update().unwrap();
        log_a.borrow_mut().clear();
        log_b.borrow_mut().clear();
        let flushes = driver.flush_count();

        a.invalidate().unwrap();
        b.invalidate().unwrap();
        a.invalidate().unwrap();
        wm.update().unwrap();

        assert_eq!(paints(&log_a), 1);
        assert_eq!(paints(&log_b), 1);
        assert_eq!(driver.flush_count(), flushes + 1);

        // Quiescent after update.
        assert!(!wm.any_dirty());
        assert!(!a.dirty().unwrap());
        assert!(!b.dirty().unwrap());
    });
}

#[test]
fn hiding_the_only_leaf_leaves_nothing_to_paint() {
    with_manager(40, 24, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let (container_handler, container_log) = recorder();
        let container = wm
            .create(None, Rect::new(0, 0, 20, 20), Some(container_handler), 1)
            .unwrap();
        let (leaf_handler, _leaf_log) = recorder();
        let leaf = container
            .create_child(Rect::new(0, 0, 20, 20), Some(leaf_handler), 2)
            .unwrap();

        wm.update().unwrap();
        container_log.borrow_mut().clear();

        // Hiding the leaf reinvalidates the container's rect, which then
        // finds no dirty leaf: the container is never painted itself.
        leaf.set_visible(false).unwrap();
        wm.update().unwrap();
        assert_eq!(paints(&container_log), 0);
        assert!(!wm.any_dirty());
    });
}

#[test]
fn showing_again_invalidates_once() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let (h, log) = recorder();
        let leaf = wm.create(None, Rect::new(0, 0, 10, 5), Some(h), 7).unwrap();
        wm.update().unwrap();

        leaf.set_visible(false).unwrap();
        wm.update().unwrap();
        log.borrow_mut().clear();

        leaf.set_visible(true).unwrap();
        leaf.set_visible(true).unwrap();
        wm.update().unwrap();
        assert_eq!(paints(&log), 1);

        // Hiding twice is as good as once.
        leaf.set_visible(false).unwrap();
        leaf.set_visible(false).unwrap();
        wm.update().unwrap();
        assert!(!wm.any_dirty());
    });
}

#[test]
fn set_pos_to_current_geometry_is_a_no_op() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let (h, log) = recorder();
        let leaf = wm
            .create(None, Rect::new(2, 2, 12, 8), Some(h), 1)
            .unwrap();
        wm.update().unwrap();
        log.borrow_mut().clear();

        leaf.set_pos(leaf.rect().unwrap()).unwrap();
        assert!(log.borrow().is_empty());
        assert!(!wm.any_dirty());
    });
}

#[test]
fn set_pos_reports_parent_relative_rects() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let (h, log) = recorder();
        let leaf = wm
            .create(None, Rect::new(2, 2, 12, 8), Some(h), 1)
            .unwrap();
        wm.update().unwrap();
        log.borrow_mut().clear();

        leaf.set_pos(Rect::new(4, 4, 14, 10)).unwrap();
        assert_eq!(leaf.rect().unwrap(), Rect::new(4, 4, 14, 10));
        let messages = log.borrow();
        assert_eq!(
            messages
                .iter()
                .find(|msg| matches!(msg, WindowMsg::PosChanged { .. })),
            Some(&WindowMsg::PosChanged {
                old: Rect::new(2, 2, 12, 8),
                new: Rect::new(4, 4, 14, 10),
            })
        );
    });
}

#[test]
fn creation_clips_to_the_screen_but_sizes_the_drawable_as_requested() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let leaf = wm
            .create(None, Rect::new(30, 0, 60, 5), None, 1)
            .unwrap();
        // Stored geometry is clipped to the terminal.
        assert_eq!(leaf.rect().unwrap(), Rect::new(30, 0, 40, 5));
        // The drawable kept the requested dimensions.
        let area = leaf.draw(|drawable| drawable.area()).unwrap();
        assert_eq!(area.width, 30);
        assert_eq!(area.height, 5);
    });
}

#[test]
fn resize_reconciles_root_and_notifies_children() {
    with_manager(40, 12, |driver, root| {
        let wm = WindowManager::current().unwrap();
        let (child_handler, child_log) = recorder();
        let child = wm
            .create(None, Rect::new(0, 0, 40, 12), Some(child_handler), 1)
            .unwrap();

        // The application reshapes children when the root moves.
        let relay = child.clone();
        root.set_handler(Some(handler(move |_root, msg| {
            if let WindowMsg::PosChanged { new, .. } = msg {
                relay
                    .set_pos(Rect::sized(new.width(), new.height()))
                    .expect("child reshape");
            }
            0
        })))
        .unwrap();

        wm.update().unwrap();
        child_log.borrow_mut().clear();

        driver.set_os_size(80, 24);
        wm.resize().unwrap();

        assert_eq!(root.rect().unwrap(), Rect::new(0, 0, 80, 24));
        assert_eq!(child.rect().unwrap(), Rect::new(0, 0, 80, 24));
        let messages = child_log.borrow();
        assert!(messages.contains(&WindowMsg::PosChanged {
            old: Rect::new(0, 0, 40, 12),
            new: Rect::new(0, 0, 80, 24),
        }));
        // resize forces an immediate paint cycle
        assert!(!wm.any_dirty());
    });
}

#[test]
fn resize_to_the_same_size_does_nothing() {
    with_manager(40, 12, |driver, root| {
        let wm = WindowManager::current().unwrap();
        wm.update().unwrap();
        let flushes = driver.flush_count();
        wm.resize().unwrap();
        assert_eq!(driver.flush_count(), flushes);
        assert_eq!(root.rect().unwrap(), Rect::new(0, 0, 40, 12));
    });
}

#[test]
fn create_then_destroy_restores_the_child_list_and_messages_balance() {
    with_manager(40, 12, |_, root| {
        let wm = WindowManager::current().unwrap();
        let (h, log) = recorder();
        let leaf = wm
            .create(None, Rect::new(0, 0, 10, 5), Some(h), 42)
            .unwrap();
        assert!(root.find_child(42).is_some());

        leaf.destroy().unwrap();
        assert!(root.find_child(42).is_none());

        let messages = log.borrow();
        let created = messages
            .iter()
            .filter(|msg| matches!(msg, WindowMsg::Created(_)))
            .count();
        // The create payload carries a handle to the new window itself.
        assert!(
            messages
                .iter()
                .any(|msg| matches!(msg, WindowMsg::Created(w) if *w == leaf))
        );
        let destroyed = messages
            .iter()
            .filter(|msg| matches!(msg, WindowMsg::Destroy))
            .count();
        assert_eq!((created, destroyed), (1, 1));
        drop(messages);

        assert!(matches!(leaf.rect(), Err(Error::DeadWindow)));
    });
}

#[test]
fn destroy_runs_post_order_over_descendants() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        let tag = |name: &'static str| {
            let order = Rc::clone(&order);
            handler(move |_w, msg| {
                if matches!(msg, WindowMsg::Destroy) {
                    order.borrow_mut().push(name);
                }
                0
            })
        };
        let parent = wm
            .create(None, Rect::new(0, 0, 20, 10), Some(tag("parent")), 1)
            .unwrap();
        parent
            .create_child(Rect::new(0, 0, 10, 10), Some(tag("first")), 2)
            .unwrap();
        parent
            .create_child(Rect::new(10, 0, 20, 10), Some(tag("second")), 3)
            .unwrap();

        parent.destroy().unwrap();
        assert_eq!(*order.borrow(), vec!["first", "second", "parent"]);
    });
}

#[test]
fn handlers_may_reenter_the_manager_during_create() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let nested = handler(move |window, msg| {
            if matches!(msg, WindowMsg::Created(_)) && window.client_id().unwrap() == 1 {
                window
                    .create_child(Rect::new(0, 0, 5, 5), None, 99)
                    .expect("re-entrant create");
            }
            0
        });
        let outer = wm
            .create(None, Rect::new(0, 0, 10, 10), Some(nested), 1)
            .unwrap();
        assert!(outer.find_child(99).is_some());
        wm.update().unwrap();
        assert!(!wm.any_dirty());
    });
}

#[test]
fn paint_output_reaches_the_physical_screen() {
    with_manager(20, 6, |driver, _root| {
        let wm = WindowManager::current().unwrap();
        let painter = handler(|window, msg| {
            if matches!(msg, WindowMsg::Paint) {
                window
                    .draw(|drawable| {
                        drawable.fill(Style::default());
                        for (i, ch) in "hello".chars().enumerate() {
                            drawable.put(i as u16, 0, ch, Style::default()).unwrap();
                        }
                    })
                    .unwrap();
            }
            0
        });
        wm.create(None, Rect::new(0, 0, 20, 6), Some(painter), 1)
            .unwrap();
        wm.update().unwrap();
        assert!(driver.row_text(0).starts_with("hello"));
    });
}

#[test]
fn invalidation_arms_the_idle_hook_and_pump_paints() {
    with_manager(20, 6, |driver, _root| {
        let wm = WindowManager::current().unwrap();
        let (h, log) = recorder();
        let leaf = wm.create(None, Rect::new(0, 0, 20, 6), Some(h), 1).unwrap();
        let msgloop = wm.message_loop();

        // Creation armed the loop; one pump settles everything.
        assert!(msgloop.readable_armed());
        assert!(msgloop.pump(Duration::ZERO).unwrap());
        assert!(paints(&log) >= 1);
        let flushes = driver.flush_count();
        log.borrow_mut().clear();

        leaf.invalidate().unwrap();
        assert!(msgloop.readable_armed());
        msgloop.pump(Duration::ZERO).unwrap();
        assert_eq!(paints(&log), 1);
        assert_eq!(driver.flush_count(), flushes + 1);
    });
}

#[test]
fn invalidate_under_hidden_ancestor_is_a_no_op() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let container = wm
            .create(None, Rect::new(0, 0, 20, 12), None, 1)
            .unwrap();
        let leaf = container
            .create_child(Rect::new(0, 0, 20, 12), None, 2)
            .unwrap();
        wm.update().unwrap();

        container.set_visible(false).unwrap();
        wm.update().unwrap();

        leaf.invalidate().unwrap();
        assert!(!wm.any_dirty());
        assert!(!leaf.dirty().unwrap());
    });
}

#[test]
fn set_handler_swaps_and_returns_the_previous_one() {
    with_manager(40, 12, |_, _root| {
        let wm = WindowManager::current().unwrap();
        let (first, _) = recorder();
        let leaf = wm
            .create(None, Rect::new(0, 0, 10, 5), Some(first), 1)
            .unwrap();
        let (second, _) = recorder();
        let previous = leaf.set_handler(Some(second)).unwrap();
        assert!(previous.is_some());
        let cleared = leaf.set_handler(None).unwrap();
        assert!(cleared.is_some());
    });
}

#[test]
fn find_child_searches_immediate_children_only() {
    with_manager(40, 12, |_, root| {
        let wm = WindowManager::current().unwrap();
        let container = wm
            .create(None, Rect::new(0, 0, 20, 12), None, 1)
            .unwrap();
        container
            .create_child(Rect::new(0, 0, 10, 6), None, 5)
            .unwrap();

        assert!(root.find_child(1).is_some());
        // Grandchild is not visible from the root.
        assert!(root.find_child(5).is_none());
        assert!(container.find_child(5).is_some());
    });
}
