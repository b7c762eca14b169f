/// Splits an ordered list into fixed-size pages.
pub struct Paginator<T> {
    items: Vec<T>,
    per_page: usize,
}

#[derive(Debug)]
pub struct Page<T> {
    pub number: usize,
    pub num_pages: usize,
    pub total: usize,
    pub object_list: Vec<T>,
}

impl<T> Paginator<T> {
    pub fn new(items: Vec<T>, per_page: usize) -> Self {
        Self {
            items,
            per_page: per_page.max(1),
        }
    }

    /// Always at least one page, even for an empty list.
    pub fn num_pages(&self) -> usize {
        count_pages(self.items.len(), self.per_page)
    }

    /// Page by raw query value: missing or garbage gives the first page,
    /// anything past the end gives the last one.
    pub fn get_page(self, raw: Option<&str>) -> Page<T> {
        let number = page_number(raw, self.items.len(), self.per_page);
        self.page(number)
    }

    fn page(self, number: usize) -> Page<T> {
        let num_pages = self.num_pages();
        let total = self.items.len();
        let object_list = self
            .items
            .into_iter()
            .skip((number - 1) * self.per_page)
            .take(self.per_page)
            .collect();
        Page {
            number,
            num_pages,
            total,
            object_list,
        }
    }
}

fn count_pages(total: usize, per_page: usize) -> usize {
    total.div_ceil(per_page.max(1)).max(1)
}

/// The page [`Paginator::get_page`] would pick for `total` items, without
/// materialising the list.
pub fn page_number(raw: Option<&str>, total: usize, per_page: usize) -> usize {
    let requested = raw.and_then(|r| r.trim().parse::<usize>().ok()).unwrap_or(1);
    requested.clamp(1, count_pages(total, per_page))
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.object_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_list.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_other_pages(&self) -> bool {
        self.num_pages > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirteen_items_split_ten_and_three() {
        let first = Paginator::new((0..13).collect::<Vec<_>>(), 10).get_page(Some("1"));
        assert_eq!(first.len(), 10);
        assert_eq!(first.num_pages, 2);
        assert!(first.has_next());
        assert!(!first.has_previous());

        let second = Paginator::new((0..13).collect::<Vec<_>>(), 10).get_page(Some("2"));
        assert_eq!(second.object_list, vec![10, 11, 12]);
        assert!(!second.has_next());
        assert!(second.has_previous());
    }

    #[test]
    fn out_of_range_and_garbage_pages() {
        let items: Vec<u32> = (0..25).collect();
        assert_eq!(Paginator::new(items.clone(), 10).get_page(Some("99")).number, 3);
        assert_eq!(Paginator::new(items.clone(), 10).get_page(Some("0")).number, 1);
        assert_eq!(Paginator::new(items.clone(), 10).get_page(Some("abc")).number, 1);
        assert_eq!(Paginator::new(items, 10).get_page(None).number, 1);
    }

    #[test]
    fn page_number_agrees_with_get_page() {
        for raw in [None, Some("2"), Some("7"), Some("x"), Some("0")] {
            let page = Paginator::new((0..25).collect::<Vec<_>>(), 10).get_page(raw);
            assert_eq!(page_number(raw, 25, 10), page.number);
        }
    }

    #[test]
    fn empty_list_has_one_empty_page() {
        let page = Paginator::new(Vec::<u32>::new(), 10).get_page(None);
        assert_eq!(page.num_pages, 1);
        assert!(page.is_empty());
        assert!(!page.has_other_pages());
    }
}
