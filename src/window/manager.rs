//! The manager singleton, the node arena, and the paint scheduler.
//!
//! Nodes live in an id-keyed map owned by the manager; public [`Window`]
//! handles carry a weak manager pointer plus a node id, so client code can
//! hold them across destruction without dangling. Every interior borrow is
//! released before a handler runs: handlers are free to re-enter the
//! manager and mutate the tree.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

use ratatui::buffer::Buffer;

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::message::{LoopEvent, MessageLoop};
use crate::screen::{Drawable, ScreenDriver};

use super::resize;
use super::{Handler, WindowMsg};

type NodeId = u64;

struct Node {
    parent: Option<NodeId>,
    // Insertion order is front-to-back paint order.
    children: Vec<NodeId>,
    drawable: Option<Drawable>,
    // Screen-absolute, clipped through the root.
    rect: Rect,
    visible: bool,
    dirty: bool,
    handler: Option<Handler>,
    client_id: i32,
}

struct Mgr {
    nodes: BTreeMap<NodeId, Node>,
    next_node: NodeId,
    root: NodeId,
    any_dirty: bool,
    // The aggregate of all painted drawables; committed is the last frame
    // the physical terminal received.
    virtual_screen: Buffer,
    committed: Buffer,
    pending_cursor: Option<(u16, u16)>,
    driver: Box<dyn ScreenDriver>,
    msgloop: MessageLoop,
    resize_fd: RawFd,
    shutting_down: bool,
}

impl Mgr {
    /// First visible dirty leaf in depth-first front-to-back order. A node
    /// with children is never returned; its children cover it.
    fn find_invalid(&self, node_id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(&node_id)?;
        if !node.visible {
            return None;
        }
        if !node.children.is_empty() {
            return node
                .children
                .iter()
                .find_map(|&child| self.find_invalid(child));
        }
        node.dirty.then_some(node_id)
    }

    /// Mark every visible leaf intersecting `rect` dirty and arm the idle
    /// hook. `rect` is screen-absolute.
    fn invalidate_rect(&mut self, node_id: NodeId, rect: Rect) {
        let (visible, node_rect, children) = match self.nodes.get(&node_id) {
            Some(node) => (node.visible, node.rect, node.children.clone()),
            None => return,
        };
        if !visible {
            return;
        }
        let Some(clipped) = node_rect.intersect(&rect) else {
            return;
        };
        if !children.is_empty() {
            for child in children {
                self.invalidate_rect(child, clipped);
            }
            return;
        }
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.dirty = true;
            self.any_dirty = true;
            self.msgloop.signal_readable();
        }
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<WindowManager>> = const { RefCell::new(None) };
}

/// Handle to the process singleton. Clones share the manager.
#[derive(Clone)]
pub struct WindowManager {
    inner: Rc<RefCell<Mgr>>,
}

/// Handle to one window in the tree.
#[derive(Clone)]
pub struct Window {
    mgr: Weak<RefCell<Mgr>>,
    node: NodeId,
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && Weak::ptr_eq(&self.mgr, &other.mgr)
    }
}

impl Eq for Window {}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window").field("node", &self.node).finish()
    }
}

impl WindowManager {
    /// Initialize the manager over the given terminal. Idempotent: when a
    /// manager is already active, the existing root is returned and the
    /// terminal is not touched again.
    pub fn init(mut driver: Box<dyn ScreenDriver>) -> Result<Window> {
        if let Some(wm) = Self::current() {
            return Ok(wm.root());
        }

        let msgloop = MessageLoop::new();
        driver.enter()?;
        let (cols, rows) = driver.size()?;
        let screen_rect = Rect::sized(cols as i32, rows as i32);
        let area = screen_rect.to_buffer_area();

        let root_id: NodeId = 1;
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root_id,
            Node {
                parent: None,
                children: Vec::new(),
                drawable: Some(Drawable::new(screen_rect)),
                rect: screen_rect,
                visible: true,
                dirty: false,
                handler: None,
                client_id: 0,
            },
        );
        let wm = WindowManager {
            inner: Rc::new(RefCell::new(Mgr {
                nodes,
                next_node: root_id + 1,
                root: root_id,
                any_dirty: false,
                virtual_screen: Buffer::empty(area),
                committed: Buffer::empty(area),
                pending_cursor: None,
                driver,
                msgloop: msgloop.clone(),
                resize_fd: -1,
                shutting_down: false,
            })),
        };
        ACTIVE.with(|slot| *slot.borrow_mut() = Some(wm.clone()));

        let root = wm.root();
        root.invalidate()?;

        // Paint at message-loop idle.
        let weak = Rc::downgrade(&wm.inner);
        msgloop.set_idle_hook(Rc::new(move |event| {
            if event == LoopEvent::Readable
                && let Some(inner) = weak.upgrade()
            {
                let wm = WindowManager { inner };
                if let Err(err) = wm.update() {
                    tracing::error!(%err, "paint cycle failed");
                }
            }
        }));

        match resize::install() {
            Ok(fd) => {
                wm.inner.borrow_mut().resize_fd = fd;
                let weak = Rc::downgrade(&wm.inner);
                msgloop.add_watch(
                    fd,
                    Rc::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            let wm = WindowManager { inner };
                            if let Err(err) = wm.resize() {
                                tracing::error!(%err, "resize reconciliation failed");
                            }
                        }
                    }),
                );
            }
            Err(err) => {
                Self::shutdown();
                return Err(err);
            }
        }

        Ok(root)
    }

    /// The active manager, if any.
    pub fn current() -> Option<WindowManager> {
        ACTIVE.with(|slot| slot.borrow().clone())
    }

    /// Tear down the tree and restore the terminal. Idempotent; safe when
    /// nothing was initialized.
    pub fn shutdown() {
        let Some(wm) = Self::current() else {
            return;
        };
        {
            let mut mgr = wm.inner.borrow_mut();
            if mgr.shutting_down {
                return;
            }
            mgr.shutting_down = true;
        }

        // The root is destroyed while the manager is still current, so
        // DESTROY handlers observe a live manager.
        let _ = wm.root().destroy();
        ACTIVE.with(|slot| slot.borrow_mut().take());

        let (msgloop, resize_fd) = {
            let mgr = wm.inner.borrow();
            (mgr.msgloop.clone(), mgr.resize_fd)
        };
        if resize_fd >= 0 {
            msgloop.remove_watch(resize_fd);
            resize::uninstall();
        }
        msgloop.shutdown();
        if let Err(err) = wm.inner.borrow_mut().driver.exit() {
            tracing::warn!(%err, "terminal restore failed");
        }
    }

    pub fn root(&self) -> Window {
        Window {
            mgr: Rc::downgrade(&self.inner),
            node: self.inner.borrow().root,
        }
    }

    pub fn message_loop(&self) -> MessageLoop {
        self.inner.borrow().msgloop.clone()
    }

    /// Read end of the SIGWINCH self-pipe, for loops that poll themselves.
    pub fn resize_fd(&self) -> RawFd {
        self.inner.borrow().resize_fd
    }

    /// Whether some leaf still awaits a paint.
    pub fn any_dirty(&self) -> bool {
        self.inner.borrow().any_dirty
    }

    /// Run a closure against the screen driver, e.g. to bind a color table
    /// or ring the bell from an emulator callback.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut dyn ScreenDriver) -> R) -> R {
        let mut mgr = self.inner.borrow_mut();
        f(mgr.driver.as_mut())
    }

    /// Create a window. `rect` is parent-relative; without a parent the
    /// window goes under the root.
    pub fn create(
        &self,
        parent: Option<&Window>,
        rect: Rect,
        handler: Option<Handler>,
        id: i32,
    ) -> Result<Window> {
        let node_id = {
            let mut mgr = self.inner.borrow_mut();
            let parent_id = match parent {
                Some(p) => {
                    if !mgr.nodes.contains_key(&p.node) {
                        return Err(Error::DeadWindow);
                    }
                    p.node
                }
                None => mgr.root,
            };
            let parent_rect = mgr.nodes[&parent_id].rect;
            let root_rect = mgr.nodes[&mgr.root].rect;

            // Parent-relative in, screen-absolute stored; clip the stored
            // rect to the screen. The drawable keeps the requested
            // dimensions at the unclipped origin.
            let screen_rect = rect.translated(parent_rect.left, parent_rect.top);
            let stored = screen_rect.intersect(&root_rect).unwrap_or_default();
            let drawable = Drawable::new(screen_rect);

            let node_id = mgr.next_node;
            mgr.next_node += 1;
            mgr.nodes.insert(
                node_id,
                Node {
                    parent: Some(parent_id),
                    children: Vec::new(),
                    drawable: Some(drawable),
                    rect: stored,
                    visible: true,
                    dirty: false,
                    handler: handler.clone(),
                    client_id: id,
                },
            );
            let parent_node = mgr
                .nodes
                .get_mut(&parent_id)
                .expect("parent checked above");
            parent_node.children.push(node_id);
            // The parent stopped being a leaf; only leaves carry the flag.
            parent_node.dirty = false;
            node_id
        };

        let window = Window {
            mgr: Rc::downgrade(&self.inner),
            node: node_id,
        };
        if let Some(h) = handler {
            h(&window, &WindowMsg::Created(window.clone()));
        }
        window.invalidate()?;
        Ok(window)
    }

    /// Paint every dirty leaf into the virtual screen, then commit the
    /// frame in one flush. Runs to quiescence: leaves re-invalidated by
    /// paint handlers are painted in the same call.
    pub fn update(&self) -> Result<()> {
        loop {
            let target = {
                let mgr = self.inner.borrow();
                if !mgr.any_dirty {
                    break;
                }
                let root = mgr.root;
                mgr.find_invalid(root)
            };
            match target {
                Some(node_id) => {
                    let handler = {
                        let mut mgr = self.inner.borrow_mut();
                        match mgr.nodes.get_mut(&node_id) {
                            Some(node) => {
                                node.dirty = false;
                                node.handler.clone()
                            }
                            None => continue,
                        }
                    };
                    if let Some(h) = handler {
                        let window = Window {
                            mgr: Rc::downgrade(&self.inner),
                            node: node_id,
                        };
                        h(&window, &WindowMsg::Paint);
                    }
                    // Copy the painted drawable into the virtual screen.
                    let mut mgr = self.inner.borrow_mut();
                    let mgr = &mut *mgr;
                    if let Some(node) = mgr.nodes.get(&node_id)
                        && let Some(drawable) = node.drawable.as_ref()
                    {
                        drawable.blit_into(&mut mgr.virtual_screen);
                        let (col, row) = drawable.cursor();
                        let area = drawable.area();
                        mgr.pending_cursor = Some((area.x + col, area.y + row));
                    }
                }
                None => {
                    // Nothing left to paint: one atomic flush to the
                    // physical terminal.
                    let mut mgr = self.inner.borrow_mut();
                    let mgr = &mut *mgr;
                    let updates = mgr.committed.diff(&mgr.virtual_screen);
                    mgr.driver.flush(&updates, mgr.pending_cursor)?;
                    mgr.committed = mgr.virtual_screen.clone();
                    mgr.any_dirty = false;
                }
            }
        }
        Ok(())
    }

    /// Reconcile the tree with the terminal's real size. Called when the
    /// resize pipe becomes readable, or directly by the application.
    pub fn resize(&self) -> Result<()> {
        resize::drain();

        let size = {
            let mgr = self.inner.borrow();
            mgr.driver.os_size()
        };
        let (cols, rows) = match size {
            Ok(size) => size,
            Err(err) => {
                tracing::warn!(%err, "terminal size query failed");
                return Ok(());
            }
        };

        {
            let mgr = self.inner.borrow();
            let root = mgr.nodes.get(&mgr.root).ok_or(Error::Shutdown)?;
            if root.rect.width() == cols as i32 && root.rect.height() == rows as i32 {
                return Ok(());
            }
        }

        self.inner.borrow_mut().driver.resize(cols, rows)?;
        self.root()
            .set_pos(Rect::sized(cols as i32, rows as i32))?;
        // Update immediately so geometry tracks the drag instead of
        // lagging it.
        self.update()
    }
}

impl Window {
    fn upgrade(&self) -> Result<Rc<RefCell<Mgr>>> {
        self.mgr.upgrade().ok_or(Error::Shutdown)
    }

    fn manager(&self) -> Result<WindowManager> {
        Ok(WindowManager {
            inner: self.upgrade()?,
        })
    }

    fn sibling(&self, node: NodeId) -> Window {
        Window {
            mgr: self.mgr.clone(),
            node,
        }
    }

    /// Create a child of this window; see [`WindowManager::create`].
    pub fn create_child(&self, rect: Rect, handler: Option<Handler>, id: i32) -> Result<Window> {
        self.manager()?.create(Some(self), rect, handler, id)
    }

    /// Destroy this window and its children, children first. Each handler
    /// receives one `Destroy` message. The revealed area under the window
    /// is not invalidated.
    pub fn destroy(&self) -> Result<()> {
        let inner = self.upgrade()?;
        loop {
            let child = {
                let mgr = inner.borrow();
                match mgr.nodes.get(&self.node) {
                    Some(node) => node.children.first().copied(),
                    // Already destroyed, e.g. by a re-entrant handler.
                    None => return Ok(()),
                }
            };
            match child {
                Some(child_id) => self.sibling(child_id).destroy()?,
                None => break,
            }
        }

        let handler = {
            let mgr = inner.borrow();
            match mgr.nodes.get(&self.node) {
                Some(node) => node.handler.clone(),
                None => return Ok(()),
            }
        };
        if let Some(h) = handler {
            h(self, &WindowMsg::Destroy);
        }

        let mut mgr = inner.borrow_mut();
        if let Some(node) = mgr.nodes.remove(&self.node)
            && let Some(parent_id) = node.parent
            && let Some(parent) = mgr.nodes.get_mut(&parent_id)
        {
            parent.children.retain(|&child| child != self.node);
        }
        Ok(())
    }

    /// Show or hide. Hiding reinvalidates the parent's full rectangle so
    /// whatever becomes the leaf under the revealed area repaints.
    pub fn set_visible(&self, visible: bool) -> Result<()> {
        let inner = self.upgrade()?;
        if visible {
            let was_hidden = {
                let mut mgr = inner.borrow_mut();
                let node = mgr.nodes.get_mut(&self.node).ok_or(Error::DeadWindow)?;
                if node.visible {
                    false
                } else {
                    node.visible = true;
                    true
                }
            };
            if was_hidden {
                self.invalidate()?;
            }
        } else {
            let mut mgr = inner.borrow_mut();
            let node = mgr.nodes.get_mut(&self.node).ok_or(Error::DeadWindow)?;
            if node.visible {
                node.visible = false;
                if let Some(parent_id) = node.parent {
                    let parent_rect = mgr.nodes.get(&parent_id).map(|parent| parent.rect);
                    if let Some(rect) = parent_rect {
                        mgr.invalidate_rect(parent_id, rect);
                    }
                }
            }
        }
        Ok(())
    }

    /// Move and/or resize. `rect` is parent-relative. Setting the current
    /// geometry is a no-op: no repaint, no message. On failure the
    /// committed rectangle is not rolled back.
    pub fn set_pos(&self, rect: Rect) -> Result<()> {
        let inner = self.upgrade()?;
        let (handler, old_rel, new_rel) = {
            let mut mgr = inner.borrow_mut();
            let mgr = &mut *mgr;
            let node = mgr.nodes.get(&self.node).ok_or(Error::DeadWindow)?;
            let parent_id = node.parent;
            let is_root = parent_id.is_none();
            let root_rect = mgr.nodes.get(&mgr.root).ok_or(Error::DeadWindow)?.rect;
            let parent_origin = match parent_id {
                Some(parent_id) => {
                    let parent = mgr.nodes.get(&parent_id).ok_or(Error::DeadWindow)?;
                    (parent.rect.left, parent.rect.top)
                }
                None => (0, 0),
            };

            let mut rc_new = rect.translated(parent_origin.0, parent_origin.1);
            let node = mgr.nodes.get_mut(&self.node).ok_or(Error::DeadWindow)?;
            if rc_new == node.rect {
                return Ok(());
            }
            if !is_root {
                // The screen layer misbehaves on out-of-bounds geometry;
                // keep everything on the terminal.
                rc_new = rc_new.intersect(&root_rect).unwrap_or_default();
            }

            let rc_old = node.rect;
            if let Some(drawable) = node.drawable.as_mut() {
                drawable.set_geometry(rc_new);
            }
            node.rect = rc_new;
            let handler = node.handler.clone();

            if is_root {
                let area = rc_new.to_buffer_area();
                mgr.virtual_screen.resize(area);
                // Force the next flush to rewrite the whole frame.
                mgr.committed = Buffer::empty(area);
            }

            let rc_invalid = rc_old.union(&rc_new);
            match parent_id {
                Some(parent_id) => mgr.invalidate_rect(parent_id, rc_invalid),
                None => {
                    let root = mgr.root;
                    mgr.invalidate_rect(root, rc_invalid);
                }
            }

            (
                handler,
                rc_old.translated(-parent_origin.0, -parent_origin.1),
                rc_new.translated(-parent_origin.0, -parent_origin.1),
            )
        };

        if let Some(h) = handler {
            h(
                self,
                &WindowMsg::PosChanged {
                    old: old_rel,
                    new: new_rel,
                },
            );
        }
        Ok(())
    }

    /// Mark this window for repaint, clipped through every ancestor. A
    /// window clipped out or under an invisible ancestor stays clean.
    pub fn invalidate(&self) -> Result<()> {
        let inner = self.upgrade()?;
        let mut mgr = inner.borrow_mut();
        let node = mgr.nodes.get(&self.node).ok_or(Error::DeadWindow)?;
        if !node.visible {
            return Ok(());
        }
        let mut clipped = node.rect;
        let mut parent = node.parent;
        while let Some(parent_id) = parent {
            let ancestor = mgr.nodes.get(&parent_id).ok_or(Error::DeadWindow)?;
            if !ancestor.visible {
                return Ok(());
            }
            match clipped.intersect(&ancestor.rect) {
                Some(rect) => clipped = rect,
                None => return Ok(()),
            }
            parent = ancestor.parent;
        }
        mgr.invalidate_rect(self.node, clipped);
        Ok(())
    }

    /// Mark every visible leaf under this window intersecting `rect`
    /// (screen-absolute) for repaint.
    pub fn invalidate_rect(&self, rect: Rect) -> Result<()> {
        let inner = self.upgrade()?;
        let mut mgr = inner.borrow_mut();
        if !mgr.nodes.contains_key(&self.node) {
            return Err(Error::DeadWindow);
        }
        mgr.invalidate_rect(self.node, rect);
        Ok(())
    }

    /// Swap the handler, returning the previous one.
    pub fn set_handler(&self, handler: Option<Handler>) -> Result<Option<Handler>> {
        let inner = self.upgrade()?;
        let mut mgr = inner.borrow_mut();
        let node = mgr.nodes.get_mut(&self.node).ok_or(Error::DeadWindow)?;
        Ok(std::mem::replace(&mut node.handler, handler))
    }

    /// Linear search of the immediate children for a client id.
    pub fn find_child(&self, id: i32) -> Option<Window> {
        let inner = self.mgr.upgrade()?;
        let mgr = inner.borrow();
        let node = mgr.nodes.get(&self.node)?;
        node.children
            .iter()
            .find(|&&child| {
                mgr.nodes
                    .get(&child)
                    .is_some_and(|node| node.client_id == id)
            })
            .map(|&child| self.sibling(child))
    }

    /// Parent-relative rectangle.
    pub fn rect(&self) -> Result<Rect> {
        let inner = self.upgrade()?;
        let mgr = inner.borrow();
        let node = mgr.nodes.get(&self.node).ok_or(Error::DeadWindow)?;
        let mut rect = node.rect;
        if let Some(parent_id) = node.parent {
            let parent = mgr.nodes.get(&parent_id).ok_or(Error::DeadWindow)?;
            rect.offset(-parent.rect.left, -parent.rect.top);
        }
        Ok(rect)
    }

    pub fn client_id(&self) -> Result<i32> {
        let inner = self.upgrade()?;
        let mgr = inner.borrow();
        Ok(mgr
            .nodes
            .get(&self.node)
            .ok_or(Error::DeadWindow)?
            .client_id)
    }

    pub fn visible(&self) -> Result<bool> {
        let inner = self.upgrade()?;
        let mgr = inner.borrow();
        Ok(mgr.nodes.get(&self.node).ok_or(Error::DeadWindow)?.visible)
    }

    pub fn dirty(&self) -> Result<bool> {
        let inner = self.upgrade()?;
        let mgr = inner.borrow();
        Ok(mgr.nodes.get(&self.node).ok_or(Error::DeadWindow)?.dirty)
    }

    /// Run a paint closure against the backing drawable. The drawable is
    /// moved out for the duration, so a re-entrant draw on the same window
    /// fails with [`Error::DrawableBusy`].
    pub fn draw<R>(&self, f: impl FnOnce(&mut Drawable) -> R) -> Result<R> {
        let inner = self.upgrade()?;
        let mut drawable = {
            let mut mgr = inner.borrow_mut();
            let node = mgr.nodes.get_mut(&self.node).ok_or(Error::DeadWindow)?;
            node.drawable.take().ok_or(Error::DrawableBusy)?
        };
        let result = f(&mut drawable);
        let mut mgr = inner.borrow_mut();
        if let Some(node) = mgr.nodes.get_mut(&self.node) {
            node.drawable = Some(drawable);
        }
        Ok(result)
    }
}
