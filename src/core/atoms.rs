// Atoms the dispatcher and the EWMH command wrappers need up front.
// Anything else is interned on demand through `Context::atom`.
x11rb::atom_manager! {
    pub AtomCollection: AtomCollectionCookie {
        WM_WINDOW_ROLE,
        _NET_ACTIVE_WINDOW,
        _NET_CLIENT_LIST,
        _NET_CLIENT_LIST_STACKING,
        _NET_CLOSE_WINDOW,
        _NET_CURRENT_DESKTOP,
        _NET_WM_DESKTOP,
        _NET_WM_STATE,
        _NET_WM_STATE_MAXIMIZED_HORZ,
        _NET_WM_STATE_MAXIMIZED_VERT,
        _NET_WM_STATE_SKIP_PAGER,
        _NET_WM_STATE_SKIP_TASKBAR,
        _OB_WM_STATE_UNDECORATED,
    }
}
